pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;

/// Open the backend named in `settings`.
///
/// Model load failures surface here and are fatal at startup.
pub fn open_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => Box::new(
            StubBackend::new().with_input_shape(settings.input_width, settings.input_height),
        ),
        "tract" => open_tract(settings)?,
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    backend.warm_up()?;
    log::info!(
        "detector backend '{}' ready ({}x{} input)",
        backend.name(),
        backend.input_shape().0,
        backend.input_shape().1
    );
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(TractBackend::new(
        &settings.model_path,
        settings.input_width,
        settings.input_height,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("the tract backend requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> DetectorSettings {
        DetectorSettings {
            backend: backend.to_string(),
            model_path: "models/missing.onnx".into(),
            input_width: 64,
            input_height: 48,
        }
    }

    #[test]
    fn opens_stub_with_configured_shape() {
        let backend = open_backend(&settings("stub")).unwrap();
        assert_eq!(backend.name(), "stub");
        assert_eq!(backend.input_shape(), (64, 48));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = open_backend(&settings("opencv")).err().expect("must fail");
        assert!(err.to_string().contains("unknown detector backend"));
    }

    #[test]
    fn missing_model_is_fatal() {
        assert!(open_backend(&settings("tract")).is_err());
    }
}
