pub mod validation;

pub use validation::{
    is_valid_annotation_key, parse_annotations, parse_fixed_ip, parse_port, parse_selector,
    validate_port, Annotations, ConfigError, ConfigResult, Selector,
};
