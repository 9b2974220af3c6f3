pub mod cache;
pub mod db;
pub mod migrations;
pub mod rows;

pub use cache::Caches;
pub use db::Ledger;
pub use rows::{
    AaResponseRow, AaRow, ArchivalReason, AssetRow, CommissionOutputRow, DefinitionRow,
    OutputRow, TriggerRow, UnhandledJoint,
};
