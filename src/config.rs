use std::fs;
use std::path::Path;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::blocks::array::DesArrayParams;
use crate::layout::PlacementGrid;
use crate::Result;

/// A deserializer array compilation request.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DesConfig {
    /// Name of the generated cell and its output files.
    pub name: ArcStr,
    pub grid: PlacementGrid,
    pub array: DesArrayParams,
}

pub fn parse_config(path: impl AsRef<Path>) -> Result<DesConfig> {
    let contents = fs::read_to_string(path)?;
    let data = toml::from_str(&contents)?;
    Ok(data)
}
