//! Method handlers, grouped by area.

pub(crate) mod lifecycle;
pub(crate) mod mapping;
pub(crate) mod reflect;
pub(crate) mod scene;
pub(crate) mod stage;
