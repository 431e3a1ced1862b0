pub mod erase;
pub mod script;
