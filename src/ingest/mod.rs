pub mod cleaner;
pub mod event;
pub mod window;
