pub mod db;
pub mod fractions;
pub mod migrate;
