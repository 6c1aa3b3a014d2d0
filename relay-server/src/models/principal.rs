use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub claims: HashMap<String, String>,
}
