pub mod account;
pub mod order;
pub mod outcome;
pub mod product;

pub use account::*;
pub use order::*;
pub use outcome::*;
pub use product::*;
