// src/persona.rs
// Named personas passed to the codex subprocess as its system prompt
// (spec.md §4.10).

const ORACLE_TRIGGERS: &[&str] = &[
    "why", "debug", "investigate", "root cause", "understand", "explain", "failing", "broken",
    "not working", "error", "bug",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaName {
    Architect,
    Oracle,
}

impl PersonaName {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonaName::Architect => "architect",
            PersonaName::Oracle => "oracle",
        }
    }
}

pub struct Persona {
    pub name: PersonaName,
    pub category: &'static str,
    pub description: &'static str,
    pub base_instructions: &'static str,
    pub sandbox_override: Option<&'static str>,
}

pub const ARCHITECT: Persona = Persona {
    name: PersonaName::Architect,
    category: "design",
    description: "Plans and reviews structural changes across the codebase.",
    base_instructions: "You are acting as a software architect. Favor clear module \
        boundaries, minimal surface area, and idiomatic patterns already used in this \
        codebase. When asked to review, call out structural risks before style nits.",
    sandbox_override: None,
};

pub const ORACLE: Persona = Persona {
    name: PersonaName::Oracle,
    category: "diagnosis",
    description: "Investigates failures and explains root causes.",
    base_instructions: "You are acting as a debugging oracle. Investigate the failure \
        described, reason about the most likely root cause before proposing a fix, and \
        state your confidence.",
    sandbox_override: None,
};

/// Select a persona for an auto-invoked subprocess call: if any oracle
/// trigger appears as a substring of the lowercased content, `oracle` is
/// chosen; otherwise `architect` is the default (spec.md §4.9 step 4,
/// testable property 7).
pub fn select_persona(content: &str) -> &'static Persona {
    let lower = content.to_lowercase();
    if ORACLE_TRIGGERS.iter().any(|t| lower.contains(t)) {
        &ORACLE
    } else {
        &ARCHITECT
    }
}

pub fn by_name(name: &str) -> Option<&'static Persona> {
    match name {
        "architect" => Some(&ARCHITECT),
        "oracle" => Some(&ORACLE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_triggers_select_oracle() {
        assert_eq!(select_persona("Why is the build failing?").name, PersonaName::Oracle);
        assert_eq!(select_persona("please DEBUG this panic").name, PersonaName::Oracle);
    }

    #[test]
    fn default_is_architect() {
        assert_eq!(select_persona("please add a new config option").name, PersonaName::Architect);
    }

    #[test]
    fn trigger_matches_as_substring() {
        assert_eq!(select_persona("the tests keep erroring out").name, PersonaName::Oracle);
    }
}
