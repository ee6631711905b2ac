//! Parameter checkpoints.
//!
//! One safetensors file per epoch, `<dir>/epoch_<N>.safetensors`, holding
//! every variable of the model's `VarMap` under its registered name.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use surgraph_core::{Error, Result};
use tracing::info;

/// Path of the checkpoint written after `epoch`.
pub fn checkpoint_path(dir: impl AsRef<Path>, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("epoch_{epoch}.safetensors"))
}

/// Save all parameters, creating `dir` if needed.
pub fn save_checkpoint(varmap: &VarMap, dir: impl AsRef<Path>, epoch: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir.as_ref())?;
    let path = checkpoint_path(dir, epoch);
    varmap.save(&path)?;
    info!(path = %path.display(), epoch, "saved checkpoint");
    Ok(path)
}

/// Load parameters into an already-built model.
///
/// Every variable in `varmap` must be present in the file with a matching
/// shape.
pub fn load_checkpoint(varmap: &mut VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Training(format!(
            "checkpoint {} does not exist",
            path.display()
        )));
    }
    varmap.load(path)?;
    info!(path = %path.display(), "loaded checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn test_checkpoint_path() {
        assert_eq!(
            checkpoint_path("ckpt/model", 7),
            PathBuf::from("ckpt/model/epoch_7.safetensors")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let device = Device::Cpu;

        let source = VarMap::new();
        let w = source
            .get((2, 3), "layer.weight", Init::Randn { mean: 0.0, stdev: 1.0 }, DType::F32, &device)
            .unwrap();
        let path = save_checkpoint(&source, dir.path().join("nested"), 3).unwrap();
        assert!(path.ends_with("epoch_3.safetensors"));

        let mut target = VarMap::new();
        let vb = VarBuilder::from_varmap(&target, DType::F32, &device);
        let _ = vb.get_with_hints((2, 3), "layer.weight", Init::Const(0.0)).unwrap();
        load_checkpoint(&mut target, &path).unwrap();

        let loaded = target.data().lock().unwrap()["layer.weight"].as_tensor().clone();
        assert_eq!(
            loaded.to_vec2::<f32>().unwrap(),
            w.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_missing_checkpoint() {
        let mut varmap = VarMap::new();
        assert!(load_checkpoint(&mut varmap, "/nonexistent/epoch_0.safetensors").is_err());
    }
}
