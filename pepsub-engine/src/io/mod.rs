//! File formats at the job boundary
//!
//! - **dataset**: joining predictions onto a processed dataset
//! - **fasta**: input records
//! - **results**: the `PepID,AMPLabel,Prob` result table, merging and coverage checks

pub mod dataset;
pub mod fasta;
pub mod results;

pub use dataset::{
    join_predictions, parse_dataset, read_dataset, write_joined, write_joined_file, DatasetRow,
    JoinedRow, JOINED_HEADER,
};
pub use fasta::{parse_fasta, read_fasta, write_fasta, write_fasta_file};
pub use results::{
    coverage, merge_result_tables, parse_results, read_results, write_results,
    write_results_file, CoverageReport, RESULT_HEADER,
};
