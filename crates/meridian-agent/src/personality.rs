//! Personality: who the agent is, rendered deterministically into the
//! system prompt.

use meridian_core::config::PersonalitySpec;

#[derive(Debug, Clone)]
pub struct Personality {
    pub name: String,
    pub role: String,
    pub tone: String,
    pub rules: Vec<String>,
    pub context: String,
}

impl Default for Personality {
    fn default() -> Self {
        default_personality()
    }
}

impl Personality {
    pub fn to_system_prompt(&self) -> String {
        let mut parts = vec![format!("You are {}, a {}.", self.name, self.role)];

        if !self.tone.is_empty() {
            parts.push(format!("\nTone: {}", self.tone));
        }
        if !self.context.is_empty() {
            parts.push(format!("\n{}", self.context));
        }
        if !self.rules.is_empty() {
            parts.push("\nRules:".to_string());
            for rule in &self.rules {
                parts.push(format!("- {rule}"));
            }
        }

        parts.push("\nYou have access to tools. Use them when appropriate.".to_string());
        parts.push("When a tool would help answer the question, call it instead of guessing.".to_string());
        parts.push("After using a tool, incorporate the result into your response naturally.".to_string());

        parts.join("\n")
    }
}

fn default_personality() -> Personality {
    Personality {
        name: "Meridian".to_string(),
        role: "AI agent with tool access".to_string(),
        tone: "Direct, helpful, slightly witty. Not corporate.".to_string(),
        rules: vec![
            "Use tools when they'd help — don't guess at file contents or system state".to_string(),
            "Keep responses concise unless the user asks for detail".to_string(),
            "If a task fails, explain why and suggest alternatives".to_string(),
            "Never fabricate file contents, command output, or data".to_string(),
        ],
        context: String::new(),
    }
}

fn coder_personality() -> Personality {
    Personality {
        name: "Meridian".to_string(),
        role: "coding assistant with filesystem and terminal access".to_string(),
        tone: "Technical, precise, no fluff".to_string(),
        rules: vec![
            "Read files before editing them — understand before you change".to_string(),
            "Run tests and builds after changes to verify they work".to_string(),
            "Prefer small, focused edits over rewriting entire files".to_string(),
            "Explain what you changed and why, briefly".to_string(),
        ],
        context: "You can read, write, and search files on the user's machine and run \
                  terminal commands. Use these capabilities freely."
            .to_string(),
    }
}

fn concise_personality() -> Personality {
    Personality {
        name: "Meridian".to_string(),
        role: "terse operations assistant".to_string(),
        tone: "Minimal. One-line answers where possible.".to_string(),
        rules: vec![
            "Answer in as few words as the answer allows".to_string(),
            "Skip preamble and caveats".to_string(),
        ],
        context: String::new(),
    }
}

/// Look up a built-in personality by name.
pub fn builtin(name: &str) -> Option<Personality> {
    match name {
        "default" => Some(default_personality()),
        "coder" => Some(coder_personality()),
        "concise" => Some(concise_personality()),
        _ => None,
    }
}

/// Resolve a config spec (built-in name or inline definition). Unknown
/// names fall back to the default personality.
pub fn resolve(spec: &PersonalitySpec) -> Personality {
    match spec {
        PersonalitySpec::Name(name) => builtin(name).unwrap_or_else(default_personality),
        PersonalitySpec::Inline {
            name,
            role,
            tone,
            rules,
            context,
        } => {
            let base = default_personality();
            Personality {
                name: if name.is_empty() { base.name } else { name.clone() },
                role: if role.is_empty() { base.role } else { role.clone() },
                tone: if tone.is_empty() { base.tone } else { tone.clone() },
                rules: rules.clone(),
                context: context.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_rendering_is_deterministic() {
        let p = builtin("default").unwrap();
        assert_eq!(p.to_system_prompt(), p.to_system_prompt());
        assert!(p.to_system_prompt().starts_with("You are Meridian"));
    }

    #[test]
    fn rules_appear_as_bullets() {
        let p = Personality {
            name: "Nova".into(),
            role: "analyst".into(),
            tone: String::new(),
            rules: vec!["cite sources".into()],
            context: String::new(),
        };
        let prompt = p.to_system_prompt();
        assert!(prompt.contains("Rules:"));
        assert!(prompt.contains("- cite sources"));
    }

    #[test]
    fn unknown_builtin_falls_back_to_default() {
        let p = resolve(&PersonalitySpec::Name("mystery".into()));
        assert_eq!(p.name, "Meridian");
    }

    #[test]
    fn inline_spec_overrides_fields() {
        let p = resolve(&PersonalitySpec::Inline {
            name: "Nova".into(),
            role: "research analyst".into(),
            tone: String::new(),
            rules: vec![],
            context: "Works at night.".into(),
        });
        assert_eq!(p.name, "Nova");
        assert_eq!(p.role, "research analyst");
        assert_eq!(p.context, "Works at night.");
    }
}
