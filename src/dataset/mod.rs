pub mod class_weight;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod split;

pub use class_weight::ClassWeights;
pub use encoder::{to_categorical, LabelEncoder};
pub use error::DataError;
pub use loader::{derive_label, list_images, load_grayscale, ImageDataset, Label, Sample};
pub use split::{stratified_split, TrainTestSplit, DEFAULT_SEED, DEFAULT_TEST_SIZE};
