use picroscopy_core::error::{PipelineError, Result};

/// Runs every step of a teardown sequence and reports the first failure.
///
/// Teardown must get as far as it can from any partially built state, so a
/// failed step is logged and the next one still runs.
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    first: Option<PipelineError>,
}

impl Teardown {
    pub(crate) fn step(&mut self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(
                target: "picroscopy::teardown",
                error = %e,
                "{} failed; continuing",
                what
            );
            self.first.get_or_insert(e);
        }
    }

    pub(crate) fn finish(self) -> Result<()> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
