//! Display of the rendered output surface.

pub mod window_output;

pub use window_output::{WindowConfig, WindowPresenter};
