//! Lightweight model health probe.
//!
//! Pushes the smallest supported input through the model's entrypoint and
//! checks that an output lands. Cheap enough to run after every install.

use std::path::Path;

use rand::Rng;

use crate::error::{Error, Result};
use crate::exec::{InferenceRequest, ModelExecutionAdapter};

const PROBE_EDGE: u32 = 8;

/// Run a probe inference in `scratch_dir` at the given scale.
pub fn run_probe(
    adapter: &dyn ModelExecutionAdapter,
    scratch_dir: &Path,
    scale: u32,
) -> Result<()> {
    std::fs::create_dir_all(scratch_dir)?;
    let token: u64 = rand::thread_rng().gen();
    let input = scratch_dir.join(format!("probe-{token:016x}.png"));
    let output = scratch_dir.join(format!("probe-{token:016x}-out.png"));

    image::RgbImage::from_pixel(PROBE_EDGE, PROBE_EDGE, image::Rgb([64, 64, 64]))
        .save(&input)
        .map_err(|err| Error::Execution(format!("could not write probe input: {err}")))?;

    let request = InferenceRequest {
        input: input.clone(),
        output: output.clone(),
        scale: scale.max(1),
        tiling: None,
        precision: None,
        compute: Some("CPU".into()),
        extra_args: Vec::new(),
    };
    let result = adapter.infer(&request);

    let _ = std::fs::remove_file(&input);
    let produced = output.exists();
    let _ = std::fs::remove_file(&output);

    match result {
        Ok(_) if produced => Ok(()),
        Ok(_) => Err(Error::Execution(
            "health probe produced no output file".into(),
        )),
        Err(err) => Err(Error::Execution(format!("health probe failed: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecError, InferenceOutcome};

    struct EchoAdapter;

    impl ModelExecutionAdapter for EchoAdapter {
        fn infer(
            &self,
            request: &InferenceRequest,
        ) -> std::result::Result<InferenceOutcome, ExecError> {
            std::fs::copy(&request.input, &request.output)?;
            Ok(InferenceOutcome {
                output: request.output.clone(),
            })
        }
    }

    struct BrokenAdapter;

    impl ModelExecutionAdapter for BrokenAdapter {
        fn infer(
            &self,
            _request: &InferenceRequest,
        ) -> std::result::Result<InferenceOutcome, ExecError> {
            Err(ExecError::Failed("entrypoint crashed".into()))
        }
    }

    #[test]
    fn test_probe_succeeds_with_working_adapter() {
        let dir = tempfile::tempdir().unwrap();
        run_probe(&EchoAdapter, dir.path(), 2).unwrap();
        // Scratch files are cleaned up either way.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_probe_fails_with_broken_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_probe(&BrokenAdapter, dir.path(), 2).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
