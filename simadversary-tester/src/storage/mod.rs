pub mod loader;
pub mod store;

pub use loader::TesterLoader;
pub use store::TesterStore;
