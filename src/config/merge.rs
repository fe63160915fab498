use super::schema::{AppConfig, PartialConfig};

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            concurrency: self.concurrency.or(fallback.concurrency),
            session_ttl_secs: self.session_ttl_secs.or(fallback.session_ttl_secs),
            final_agent: self.final_agent.or(fallback.final_agent),
            completeness_agent: self.completeness_agent.or(fallback.completeness_agent),
            age_agent: self.age_agent.or(fallback.age_agent),
            condition_agent: self.condition_agent.or(fallback.condition_agent),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    ///
    /// The default concurrency of 2 matches the reference deployment's
    /// memory budget; unconstrained hosts can raise it to the agent count.
    pub fn finalize(self) -> AppConfig {
        AppConfig {
            concurrency: self.concurrency.unwrap_or(2).max(1),
            session_ttl_secs: self.session_ttl_secs.unwrap_or(3600),
            final_agent: self.final_agent.unwrap_or_else(|| "strategist".to_string()),
            completeness_agent: self
                .completeness_agent
                .unwrap_or_else(|| "guardian".to_string()),
            age_agent: self.age_agent.unwrap_or_else(|| "historian".to_string()),
            condition_agent: self
                .condition_agent
                .unwrap_or_else(|| "inspector".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_values_win() {
        let high = PartialConfig {
            concurrency: Some(4),
            ..Default::default()
        };
        let low = PartialConfig {
            concurrency: Some(1),
            final_agent: Some("reducer".to_string()),
            ..Default::default()
        };

        let merged = high.with_fallback(low).finalize();

        assert_eq!(merged.concurrency, 4);
        assert_eq!(merged.final_agent, "reducer");
    }

    #[test]
    fn defaults_fill_remaining_gaps() {
        let config = PartialConfig::default().finalize();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.final_agent, "strategist");
        assert_eq!(config.completeness_agent, "guardian");
        assert_eq!(config.age_agent, "historian");
        assert_eq!(config.condition_agent, "inspector");
    }

    #[test]
    fn zero_concurrency_is_clamped_to_one() {
        let config = PartialConfig {
            concurrency: Some(0),
            ..Default::default()
        }
        .finalize();
        assert_eq!(config.concurrency, 1);
    }
}
