use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

/// Read one knob from the environment. Absent or unusable values fall back
/// to `default`; overrides are logged so the logs and the process
/// environment agree on the effective configuration.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T {
    let Some(raw) = env::var_os(name) else {
        return default;
    };
    match raw.to_str().and_then(|s| s.parse::<T>().ok()) {
        Some(value) => {
            tracing::info!("knob {name} overridden to {value:?}");
            value
        },
        None => {
            tracing::warn!("knob {name} has unusable value {raw:?}; keeping default {default:?}");
            default
        },
    }
}

#[cfg(test)]
mod tests {
    use super::env_config;

    #[test]
    fn absent_variable_yields_default() {
        assert_eq!(env_config("FAAS_TEST_KNOB_THAT_DOES_NOT_EXIST", 42usize), 42);
    }

    #[test]
    fn unparseable_value_yields_default() {
        // Modifying the process environment is unsafe in edition 2024; keep
        // the override scoped to this test binary.
        unsafe { std::env::set_var("FAAS_TEST_BAD_KNOB", "not-a-number") };
        assert_eq!(env_config("FAAS_TEST_BAD_KNOB", 7u64), 7);
    }
}
