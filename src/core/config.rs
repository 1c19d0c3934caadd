mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    AnnotationSettings, CoordinateOrigin, GradingSettings, OcrSettings, PipelineSettings,
    S3Settings, ScoreScale, Settings,
};
