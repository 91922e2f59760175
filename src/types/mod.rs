pub mod binding;
pub mod callbacks;
pub mod enums;
pub mod foreign;
