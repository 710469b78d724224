use async_trait::async_trait;
use sdk::skill::{Skill, SkillError, SkillExecution, SkillResult};
use serde_json::{json, Value};

/// Returns the calling agent, the run input and the call arguments unchanged.
pub struct EchoSkill {
    name: String,
    description: String,
}

impl EchoSkill {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            name: name.into(),
            description: if description.trim().is_empty() {
                "Echoes input and args".to_string()
            } else {
                description
            },
        }
    }
}

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Optional note to echo back",
                },
            },
        })
    }

    async fn execute(&self, exec: SkillExecution) -> Result<SkillResult, SkillError> {
        let mut out = SkillResult::new();
        out.insert("agent".into(), Value::String(exec.agent_name));
        out.insert("input".into(), Value::String(exec.input));
        out.insert("args".into(), Value::Object(exec.args));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_call() {
        let skill = EchoSkill::new("echo", "");
        assert_eq!(skill.description(), "Echoes input and args");
        let out = skill
            .execute(SkillExecution::new("planner", "goal").with_arg("message", json!("hi")))
            .await
            .unwrap();
        assert_eq!(out["agent"], "planner");
        assert_eq!(out["input"], "goal");
        assert_eq!(out["args"]["message"], "hi");
    }
}
