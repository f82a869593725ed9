//! Sequence id management.
//!
//! Names are registered once, in observation order, and resolve to dense
//! `SeqId`s for the rest of the run. Prefix grouping rules decide which
//! query/target pairs are eligible for mapping.

use crate::config::MapConfig;
use crate::types::{Offset, SeqId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("duplicate sequence name: {0}")]
    DuplicateName(String),

    #[error("unknown sequence id: {0}")]
    UnknownId(SeqId),

    #[error("unknown sequence name: {0}")]
    UnknownName(String),
}

#[derive(Debug, Clone)]
struct SeqInfo {
    name: String,
    length: Offset,
    is_target: bool,
    is_query: bool,
}

/// Registry of sequence names, lengths and roles.
///
/// Append-only while inputs are scanned, read-only afterwards.
#[derive(Debug, Default)]
pub struct SequenceIdManager {
    seqs: Vec<SeqInfo>,
    by_name: HashMap<String, SeqId>,
}

impl SequenceIdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sequence, assigning the next id. A name may be registered
    /// as both target and query (self-mapping) but never twice in one role.
    pub fn register(
        &mut self,
        name: &str,
        length: Offset,
        is_target: bool,
        is_query: bool,
    ) -> Result<SeqId, IdError> {
        if let Some(&id) = self.by_name.get(name) {
            let info = &mut self.seqs[id as usize];
            if (is_target && info.is_target) || (is_query && info.is_query) {
                return Err(IdError::DuplicateName(name.to_string()));
            }
            info.is_target |= is_target;
            info.is_query |= is_query;
            return Ok(id);
        }
        let id = self.seqs.len() as SeqId;
        self.seqs.push(SeqInfo {
            name: name.to_string(),
            length,
            is_target,
            is_query,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    pub fn name(&self, id: SeqId) -> Result<&str, IdError> {
        self.seqs
            .get(id as usize)
            .map(|s| s.name.as_str())
            .ok_or(IdError::UnknownId(id))
    }

    pub fn length(&self, id: SeqId) -> Result<Offset, IdError> {
        self.seqs
            .get(id as usize)
            .map(|s| s.length)
            .ok_or(IdError::UnknownId(id))
    }

    pub fn id(&self, name: &str) -> Result<SeqId, IdError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| IdError::UnknownName(name.to_string()))
    }

    pub fn target_ids(&self) -> Vec<SeqId> {
        self.role_ids(|s| s.is_target)
    }

    pub fn query_ids(&self) -> Vec<SeqId> {
        self.role_ids(|s| s.is_query)
    }

    fn role_ids(&self, pred: impl Fn(&SeqInfo) -> bool) -> Vec<SeqId> {
        self.seqs
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(s))
            .map(|(i, _)| i as SeqId)
            .collect()
    }

    pub fn total_target_length(&self) -> u64 {
        self.seqs.iter().filter(|s| s.is_target).map(|s| s.length).sum()
    }

    /// Group prefix of a name: everything up to and including the last
    /// occurrence of the delimiter, or the empty string without one.
    pub fn group_prefix<'a>(name: &'a str, delim: char) -> &'a str {
        match name.rfind(delim) {
            Some(i) => &name[..=i],
            None => "",
        }
    }

    /// Whether a (query, target) pair is eligible for mapping under the
    /// configured name-space rules.
    pub fn pair_eligible(&self, query_id: SeqId, target_id: SeqId, config: &MapConfig) -> bool {
        let qname = &self.seqs[query_id as usize].name;
        let tname = &self.seqs[target_id as usize].name;
        if config.skip_self && qname == tname {
            return false;
        }
        if config.lower_triangular && query_id <= target_id && qname != tname {
            // Each unordered pair is visited from its higher-id side only.
            return false;
        }
        if config.skip_prefix {
            let qp = Self::group_prefix(qname, config.prefix_delim);
            let tp = Self::group_prefix(tname, config.prefix_delim);
            if !qp.is_empty() && qp == tp {
                return false;
            }
        }
        true
    }

    /// Whether a target name passes the target prefix restriction.
    pub fn target_admitted(name: &str, config: &MapConfig) -> bool {
        match &config.target_prefix {
            Some(prefix) => name.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Whether a query name passes the query prefix restriction.
    pub fn query_admitted(name: &str, config: &MapConfig) -> bool {
        if config.query_prefix.is_empty() {
            return true;
        }
        config.query_prefix.iter().any(|p| name.starts_with(p.as_str()))
    }
}
