//! Orchestration for kbcrawl.
//!
//! Ties the crawl client, classifier, and document assembly together into a
//! single run: submit a crawl job, wait for it, walk its results, and build
//! the on-disk corpus (see [`pipeline::run`]).

pub mod assembler;
pub mod corpus;
pub mod pipeline;
