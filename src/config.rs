//! Limits and runtime configuration, read from the environment.

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Caps that keep one issue (or one participant) from overloading the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_contrib_per_user_per_issue: usize,
    /// Positions plus arguments in one issue.
    pub max_total_nodes_per_issue: usize,
    pub max_issues_per_user: usize,
    pub max_total_issues: usize,
    pub max_text_input_string_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_contrib_per_user_per_issue: 10_000,
            max_total_nodes_per_issue: 25_000,
            max_issues_per_user: 2_500,
            max_total_issues: 25_000,
            max_text_input_string_chars: 4_000,
        }
    }
}

impl Limits {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_contrib_per_user_per_issue: env_or("MAX_CONTRIB_PER_USER", d.max_contrib_per_user_per_issue),
            max_total_nodes_per_issue: env_or("MAX_NODES_PER_ISSUE", d.max_total_nodes_per_issue),
            max_issues_per_user: env_or("MAX_ISSUES_PER_USER", d.max_issues_per_user),
            max_total_issues: env_or("MAX_TOTAL_ISSUES", d.max_total_issues),
            max_text_input_string_chars: env_or("MAX_STATEMENT_CHARS", d.max_text_input_string_chars),
        }
    }
}

/// Parameters of the bundled possible-world solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Programs with at most this many probabilistic facts are solved exactly.
    pub exact_fact_limit: usize,
    /// Sample count for the Monte-Carlo fallback.
    pub samples: usize,
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            exact_fact_limit: 16,
            samples: 20_000,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub limits: Limits,
    pub solver: SolverConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let solver = SolverConfig::default();
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./arggraph.sqlite".to_string()),
            limits: Limits::from_env(),
            solver: SolverConfig {
                exact_fact_limit: env_or("SOLVER_EXACT_FACTS", solver.exact_fact_limit),
                samples: env_or("SOLVER_SAMPLES", solver.samples),
                seed: env_or("SOLVER_SEED", solver.seed),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            limits: Limits::default(),
            solver: SolverConfig::default(),
        }
    }
}

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn cap_statement(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
