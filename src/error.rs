use arcstr::ArcStr;
use thiserror::Error;

use crate::layout::grid::LayerId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("not enough tracks: {required} required, {available} available")]
    ResourceExhausted { required: usize, available: usize },

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("missing required parameter `{0}`")]
    MissingParam(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid placement grid: {0}")]
    InvalidGrid(String),

    #[error("no port named `{0}`")]
    PortNotFound(ArcStr),

    #[error("no routing layer with id {0}")]
    LayerNotFound(LayerId),

    #[error("no tile named `{0}`")]
    TileNotFound(ArcStr),

    #[error("tile index {0} is out of range")]
    TileIndex(usize),

    #[error("cannot connect a wire on layer {from} to a track on layer {to}")]
    LayerMismatch { from: LayerId, to: LayerId },

    #[error("failed to serialize parameters: {0}")]
    Params(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
