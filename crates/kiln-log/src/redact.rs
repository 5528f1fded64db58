/// Replaces sensitive values with placeholders.
///
/// Built once per job. Longer secrets are replaced first so a secret that contains another one is never partially leaked.
/// Empty secrets are ignored.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    pairs: Vec<(String, String)>,
}

impl Redactor {
    pub fn new<I, K, V>(replacements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut pairs: Vec<(String, String)> = replacements
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        pairs.dedup_by(|a, b| a.0 == b.0);
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn redact(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (secret, placeholder) in &self.pairs {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), placeholder);
            }
        }
        out
    }

    pub fn redact_all(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.redact(s)).collect()
    }
}
