//! Display-side state for processed icons

pub mod icon_view;

pub use icon_view::{IconVariant, IconView, ViewState};
