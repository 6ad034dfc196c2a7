pub mod blocks;
pub mod treatments;
