// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge retrieval and teaching for the Parley conversation engine.
//!
//! [`KnowledgeRetriever`] answers "what do we know about this message" with a
//! hybrid vector/keyword ranking; [`KnowledgeCurator`] records what a human
//! taught, deprecating contradicted facts instead of overwriting them.

pub mod extractor;
pub mod retriever;
pub mod scoring;

pub use extractor::{KnowledgeCandidate, KnowledgeCurator, TeachOutcome};
pub use retriever::{KnowledgeRetriever, Retrieval, RetrievalQuery, ScoredItem};
