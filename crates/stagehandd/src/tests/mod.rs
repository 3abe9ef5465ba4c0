//! Test suites for the Stagehand daemon.

mod dispatch_behaviour;
mod support;
