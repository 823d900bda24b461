//! YAML loader with custom tag support

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader that expands `!include` and `!env_var` tags
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    base_dir: PathBuf,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let v = self.process_value(v, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Processing tag '{}' with value {:?}", tag, tagged.value);

        match tag.as_str() {
            "!include" => self.process_include(tagged.value, source_path),
            "!env_var" => process_env_var(tagged.value),
            _ => {
                let processed = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    fn process_include(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        let Value::String(relative) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!include".to_string(),
                reason: "include path must be a string".to_string(),
            });
        };

        let dir = source_path.parent().unwrap_or(&self.base_dir);
        let path = dir.join(relative);
        if !path.exists() {
            return Err(ConfigError::IncludeNotFound { path });
        }

        debug!("Including file: {:?}", path);
        self.load_file(&path)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// `!env_var NAME` or `!env_var NAME default`
fn process_env_var(value: Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let (var_name, default) = match spec.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (spec.as_str(), None),
    };

    let env_value = match (std::env::var(var_name), default) {
        (Ok(value), _) => value,
        (Err(_), Some(default)) => default.to_string(),
        (Err(_), None) => {
            return Err(ConfigError::EnvVarNotFound {
                var: var_name.to_string(),
            })
        }
    };

    debug!("Substituted env var: {}", var_name);

    // Re-parse so numeric and boolean values keep their YAML type
    Ok(serde_yaml::from_str(&env_value).unwrap_or(Value::String(env_value)))
}

/// Load a YAML file relative to `base_dir`
pub fn load_yaml(base_dir: impl AsRef<Path>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(base_dir.as_ref()).load_file(file)
}

/// Load YAML from a string; includes resolve against the working directory
pub fn load_yaml_string(content: &str) -> ConfigResult<Value> {
    YamlLoader::new(".").load_string(content, Path::new("<string>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.as_mapping().unwrap().get(key).unwrap()
    }

    #[test]
    fn test_load_simple_yaml() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "engine.yaml", "engine:\n  poll_interval_ms: 50\n");

        let value = load_yaml(dir.path(), "engine.yaml").unwrap();
        assert_eq!(get(get(&value, "engine"), "poll_interval_ms"), &Value::from(50));
    }

    #[test]
    fn test_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "sub/paths.yaml", "recordings: /data/rec\n");
        write_file(dir.path(), "engine.yaml", "paths: !include sub/paths.yaml\n");

        let value = load_yaml(dir.path(), "engine.yaml").unwrap();
        assert_eq!(
            get(get(&value, "paths"), "recordings"),
            &Value::String("/data/rec".to_string())
        );
    }

    #[test]
    fn test_include_missing_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "engine.yaml", "paths: !include nope.yaml\n");

        let err = load_yaml(dir.path(), "engine.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IncludeNotFound { .. }));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let err = load_yaml(dir.path(), "a.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::CircularInclude { .. }));
    }

    #[test]
    fn test_env_var() {
        std::env::set_var("MP_CONFIG_TEST_TEMPLATES", "/opt/templates");
        std::env::set_var("MP_CONFIG_TEST_POLL", "25");

        let value = load_yaml_string(
            "templates: !env_var MP_CONFIG_TEST_TEMPLATES\npoll: !env_var MP_CONFIG_TEST_POLL\n",
        )
        .unwrap();

        assert_eq!(
            get(&value, "templates"),
            &Value::String("/opt/templates".to_string())
        );
        assert_eq!(get(&value, "poll"), &Value::from(25));
    }

    #[test]
    fn test_env_var_default() {
        let value = load_yaml_string("level: !env_var MP_CONFIG_TEST_UNSET_LEVEL debug\n").unwrap();
        assert_eq!(get(&value, "level"), &Value::String("debug".to_string()));
    }

    #[test]
    fn test_env_var_missing() {
        let err = load_yaml_string("level: !env_var MP_CONFIG_TEST_DEFINITELY_UNSET\n").unwrap_err();
        assert!(
            matches!(err, ConfigError::EnvVarNotFound { ref var } if var == "MP_CONFIG_TEST_DEFINITELY_UNSET")
        );
    }
}
