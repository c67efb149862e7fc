pub mod deck;
pub mod scanner;
pub mod syntax;
