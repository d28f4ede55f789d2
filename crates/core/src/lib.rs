//! Face detection with backend fallback and an incrementally trained face
//! classifier on top of a frozen feature extractor.

pub mod shared {
    pub mod bounding_box;
    pub mod constants;
    pub mod execution_provider;
    pub mod frame;
    pub mod model_resolver;
    pub mod tensor_arena;
}

pub mod detection {
    pub mod domain {
        pub mod detector_strategy;
        pub mod face_detector;
    }
    pub mod infrastructure;
}

pub mod recognition {
    pub mod domain {
        pub mod dataset;
        pub mod feature_extractor;
        pub mod head_model;
        pub mod head_slot;
        pub mod image_store;
        pub mod model_serializer;
        pub(crate) mod optimizer;
        pub mod predictor;
        pub mod sample;
        #[cfg(test)]
        pub(crate) mod test_support;
        pub mod training;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod capture_sample_use_case;
    pub mod progress_logger;
    pub mod recognize_faces_use_case;
    pub mod train_head_use_case;
}
