//! Environment helpers: `.env` files, the production flag and prefixed option loading.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// True when `APP_PRODUCTION` is set to `true` (any case).
pub fn is_production() -> bool {
    std::env::var("APP_PRODUCTION")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Name of the env file for the current mode.
pub fn env_file_name(production: bool) -> &'static str {
    if production {
        ".env.prod"
    } else {
        ".env"
    }
}

/// Load `.env` (or `.env.prod` in production) into the process environment.
///
/// Runs before configuration and logging exist, so it only reports which file
/// was loaded; a missing file is not an error.
pub fn load_env_files() -> Option<&'static str> {
    let file = env_file_name(is_production());
    dotenv::from_filename(file).ok().map(|_| file)
}

/// `{PREFIX}*` variables with the prefix stripped and the rest lower-cased.
///
/// Values stay the exact text from the environment: `DB_PASSWORD=0123` is the
/// string `"0123"`, never a number. Numeric and boolean fields are converted
/// on extraction with `Figment::extract_lossy`.
pub fn prefixed_vars(prefix: &str, ignore: &[&str]) -> BTreeMap<String, String> {
    let prefix = prefix.to_ascii_uppercase();
    std::env::vars_os()
        .filter_map(|(k, v)| {
            let (k, v) = (k.into_string().ok()?, v.into_string().ok()?);
            let key = k.to_ascii_uppercase().strip_prefix(&prefix)?.to_ascii_lowercase();
            (!key.is_empty() && !ignore.contains(&key.as_str())).then_some((key, v))
        })
        .collect()
}

/// Populate `T` from `{PREFIX}_*` environment variables on top of `T::default()`.
///
/// `prefix` is upper-cased, so a module named `greeter` reads `GREETER_WORLD`
/// into the field `world`.
pub fn load_prefixed<T>(prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    use figment::{providers::Serialized, Figment};

    let env_prefix = format!("{}_", prefix.to_ascii_uppercase());
    Figment::from(Serialized::defaults(T::default()))
        .merge(Serialized::defaults(prefixed_vars(&env_prefix, &[])))
        .extract_lossy()
        .with_context(|| format!("Failed to load {env_prefix}* options from environment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::env;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Opts {
        world: String,
        retries: u32,
    }

    #[test]
    fn prefixed_vars_override_defaults() {
        env::set_var("MODHOST_ENV_TEST_A_WORLD", "mars");
        env::set_var("MODHOST_ENV_TEST_A_RETRIES", "3");

        let opts: Opts = load_prefixed("modhost_env_test_a").expect("load");
        assert_eq!(
            opts,
            Opts {
                world: "mars".into(),
                retries: 3
            }
        );
    }

    #[test]
    fn missing_vars_keep_defaults() {
        let opts: Opts = load_prefixed("modhost_env_test_b").expect("load");
        assert_eq!(opts, Opts::default());
    }

    #[test]
    fn malformed_value_is_an_error() {
        env::set_var("MODHOST_ENV_TEST_C_RETRIES", "many");
        let err = load_prefixed::<Opts>("modhost_env_test_c").unwrap_err();
        assert!(err.to_string().contains("MODHOST_ENV_TEST_C_"));
    }

    #[test]
    fn numeric_looking_text_stays_a_string() {
        env::set_var("MODHOST_ENV_TEST_D_WORLD", "0042");
        env::set_var("MODHOST_ENV_TEST_D_RETRIES", "7");

        let opts: Opts = load_prefixed("modhost_env_test_d").expect("load");
        assert_eq!(opts.world, "0042");
        assert_eq!(opts.retries, 7);
    }

    #[test]
    fn prefixed_vars_strip_and_lowercase() {
        env::set_var("MODHOST_ENV_TEST_E_JWT_KEY", "42");
        env::set_var("MODHOST_ENV_TEST_E_PRODUCTION", "yes");

        let vars = prefixed_vars("modhost_env_test_e_", &["production"]);
        assert_eq!(vars.get("jwt_key").map(String::as_str), Some("42"));
        assert!(!vars.contains_key("production"));
    }

    #[test]
    fn env_file_follows_mode() {
        assert_eq!(env_file_name(false), ".env");
        assert_eq!(env_file_name(true), ".env.prod");
    }
}
