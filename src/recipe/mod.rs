pub mod constants;
pub mod registry;
pub mod schema;

pub use registry::{RecipeRegistry, RegistryLoadError};
pub use schema::{Recipe, RecipeError};
