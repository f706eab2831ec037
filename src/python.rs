use std::collections::BTreeMap;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::CleanConfig;
use crate::corpus::{Corpus, ProcessedMarker};
use crate::pipeline::Cleaner;

fn cleaner_from_toml(config_toml: Option<&str>) -> PyResult<Cleaner> {
    let config = match config_toml {
        Some(src) => CleanConfig::from_toml_str(src)
            .map_err(|e| PyValueError::new_err(format!("Invalid config: {}", e)))?,
        None => CleanConfig::default(),
    };
    Cleaner::new(config).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Clean one book's spine.
/// Takes: [(href, xhtml)] in spine order, optional TOML config, optional
/// marker text from a previous run ("fingerprint;timestamp").
/// Returns: (status, [(href, xhtml)], counters, marker)
#[pyfunction]
#[pyo3(signature = (documents, config_toml=None, processed=None))]
fn clean_spine(
    documents: Vec<(String, String)>,
    config_toml: Option<String>,
    processed: Option<String>,
) -> PyResult<(String, Vec<(String, String)>, BTreeMap<String, u64>, Option<String>)> {
    let cleaner = cleaner_from_toml(config_toml.as_deref())?;

    let mut corpus = Corpus::from_sources("spine", documents.iter().map(|(h, s)| (h.as_str(), s.as_str())))
        .map_err(|(href, e)| PyValueError::new_err(format!("Malformed document {}: {}", href, e)))?;
    corpus.metadata.processed = processed.as_deref().and_then(ProcessedMarker::from_meta_content);

    let outcome = cleaner.process(corpus);
    let documents = outcome
        .corpus
        .documents
        .iter()
        .map(|doc| (doc.id.clone(), doc.to_xhtml()))
        .collect();
    let marker = outcome
        .corpus
        .metadata
        .processed
        .as_ref()
        .map(ProcessedMarker::to_meta_content);

    Ok((outcome.status.label().to_string(), documents, outcome.counters.to_map(), marker))
}

/// Fingerprint a configuration the way the processed marker records it
#[pyfunction]
#[pyo3(signature = (config_toml=None))]
fn config_fingerprint(config_toml: Option<String>) -> PyResult<String> {
    Ok(cleaner_from_toml(config_toml.as_deref())?.fingerprint().to_string())
}

#[pymodule]
fn rust_epub_clean(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(clean_spine, m)?)?;
    m.add_function(wrap_pyfunction!(config_fingerprint, m)?)?;
    Ok(())
}
