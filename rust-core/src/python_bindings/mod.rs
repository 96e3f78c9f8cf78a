//! PyO3 bindings for Python integration

use pyo3::prelude::*;

mod analyzer_bindings;

/// Python module definition
#[pymodule]
fn rtl_spectrum(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<analyzer_bindings::PyAnalyzer>()?;
    m.add_class::<analyzer_bindings::PySettings>()?;

    Ok(())
}
