//! 动作与事实元数据
//!
//! 元数据由构建期的提取工具生成，引擎启动时加载一次，之后只读。
//! 动作目录为空时引擎处于开放模式，不校验动作类型和参数。

use crate::error::{Result, RuleError};
use crate::models::{FactType, OutputAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// 动作参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParameterType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// 动作参数定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type", default = "default_parameter_type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
}

fn default_parameter_type() -> ParameterType {
    ParameterType::Any
}

/// 动作定义：类型 + 参数模式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterDefinition>,
}

/// 引擎元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    /// 事实名 -> 声明类型
    #[serde(default)]
    pub facts: BTreeMap<String, FactType>,
}

impl EngineMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(json)?;
        metadata.check_duplicates()?;
        Ok(metadata)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn check_duplicates(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.action_type.as_str()) {
                return Err(RuleError::DuplicateId(format!(
                    "action {}",
                    action.action_type
                )));
            }
        }
        Ok(())
    }

    /// 未声明任何动作时不做动作校验
    pub fn is_open(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action(&self, action_type: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.action_type == action_type)
    }

    pub fn fact_type(&self, fact_name: &str) -> Option<FactType> {
        self.facts.get(fact_name).copied()
    }

    /// 校验输出动作的类型与参数
    pub fn validate_action(&self, action: &OutputAction, path: &str) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let definition =
            self.action(&action.action_type)
                .ok_or_else(|| RuleError::UnknownAction {
                    action_type: action.action_type.clone(),
                    path: path.to_string(),
                })?;

        for (name, parameter) in &definition.parameters {
            match action.parameters.get(name) {
                None if parameter.required => {
                    return Err(RuleError::InvalidActionParameters {
                        message: format!("缺少必填参数 '{}'", name),
                        path: path.to_string(),
                    });
                }
                Some(value) if !parameter.param_type.accepts(value) => {
                    return Err(RuleError::InvalidActionParameters {
                        message: format!(
                            "参数 '{}' 期望 {:?}, 实际 {}",
                            name,
                            parameter.param_type,
                            crate::operators::type_name(value)
                        ),
                        path: path.to_string(),
                    });
                }
                _ => {}
            }
        }

        if let Some(unknown) = action
            .parameters
            .keys()
            .find(|key| !definition.parameters.contains_key(*key))
        {
            return Err(RuleError::InvalidActionParameters {
                message: format!("未声明的参数 '{}'", unknown),
                path: path.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> EngineMetadata {
        EngineMetadata::from_json(
            &json!({
                "actions": [
                    {"type": "setLanguage", "parameters": {"lang": {"type": "string", "required": true}}},
                    {"type": "redirect", "parameters": {"url": {"type": "string"}, "delay": {"type": "number"}}}
                ],
                "facts": {"destination": "string", "passengers": "number"}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_mode_accepts_anything() {
        let open = EngineMetadata::default();
        assert!(open.is_open());
        open.validate_action(&OutputAction::new("whatever"), "root")
            .unwrap();
    }

    #[test]
    fn test_known_action_passes() {
        let action = OutputAction::new("setLanguage").with_parameter("lang", "fr-FR");
        metadata().validate_action(&action, "root").unwrap();

        let optional = OutputAction::new("redirect");
        metadata().validate_action(&optional, "root").unwrap();
        assert_eq!(metadata().fact_type("destination"), Some(FactType::String));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = metadata()
            .validate_action(&OutputAction::new("launchRocket"), "rules[0]")
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ACTION");
        assert!(err.to_string().contains("rules[0]"));
    }

    #[test]
    fn test_parameter_schema_enforced() {
        let missing = OutputAction::new("setLanguage");
        assert_eq!(
            metadata().validate_action(&missing, "r").unwrap_err().code(),
            "INVALID_ACTION_PARAMETERS"
        );

        let wrong_type = OutputAction::new("redirect").with_parameter("delay", "soon");
        assert!(metadata().validate_action(&wrong_type, "r").is_err());

        let extra = OutputAction::new("setLanguage")
            .with_parameter("lang", "fr")
            .with_parameter("region", "FR");
        assert!(metadata().validate_action(&extra, "r").is_err());
    }

    #[test]
    fn test_duplicate_action_types_rejected() {
        let json = json!({"actions": [{"type": "a"}, {"type": "a"}]}).to_string();
        assert!(matches!(
            EngineMetadata::from_json(&json),
            Err(RuleError::DuplicateId(_))
        ));
    }
}
