pub mod display;

pub use display::{KeyCommand, Sdl2Display};
