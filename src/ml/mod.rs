pub mod inference;
pub mod ml_model;
pub mod training;

pub use inference::{restore_model, InferenceEngine};
pub use ml_model::{
    weighted_binary_cross_entropy, Architecture, ModelConfig, SmileNet, IMAGE_WIDTH, NUM_CLASSES,
};
pub use training::{
    predict_classes, train_model, SmileBatch, SmileBatcher, SmileDataset, SmileItem,
    TrainingHistory,
};
