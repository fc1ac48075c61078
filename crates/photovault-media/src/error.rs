use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HEIF decode error: {0}")]
    Heif(String),

    #[error("Empty input")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
