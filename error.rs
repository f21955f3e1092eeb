use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor Shape Error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid Configuration: {0}")]
    Config(String),

    #[error("Invalid Frame: {0}")]
    InvalidFrame(String),

    #[error("Inference Failed: {0}")]
    Inference(String),

    #[error("Initialization Failed: {0}")]
    Init(String),
}
