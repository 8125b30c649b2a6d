//! Map single-cell transcriptomes onto labelled reference atlases
//!
//! Query cells are projected into a reference embedding with
//! mixture-of-experts batch correction, screened by their distance to
//! the nearest reference cells, and labelled by their neighbours.
//! Labels are then summarized per donor, optionally in two stages
//! (broad reference first, focused reference for a selected lineage).

pub mod build_reference;
pub mod common;
pub mod composition;
pub mod label_transfer;
pub mod mapping_qc;
pub mod neighbours;
pub mod normalization;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod query;
pub mod reference;
