//! Instance size ladder and pricing

use serde::{Deserialize, Serialize};

/// Hours used to turn hourly prices into monthly savings
pub const HOURS_PER_MONTH: f64 = 720.0;

/// One rung of the ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceClass {
    pub name: String,
    pub hourly_price: f64,
}

/// Instance classes ordered from smallest to largest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceLadder {
    pub classes: Vec<InstanceClass>,
}

impl Default for InstanceLadder {
    fn default() -> Self {
        let rungs = [
            ("t3.micro", 0.0104),
            ("t3.small", 0.0208),
            ("t3.medium", 0.0416),
            ("t3.large", 0.0832),
            ("t3.xlarge", 0.1664),
            ("t3.2xlarge", 0.3328),
        ];
        Self {
            classes: rungs
                .iter()
                .map(|(name, price)| InstanceClass {
                    name: name.to_string(),
                    hourly_price: *price,
                })
                .collect(),
        }
    }
}

impl InstanceLadder {
    fn position(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&InstanceClass> {
        self.position(name).map(|i| &self.classes[i])
    }

    /// The next smaller class, `None` at the bottom or for unknown classes
    pub fn next_smaller(&self, name: &str) -> Option<&InstanceClass> {
        match self.position(name)? {
            0 => None,
            i => self.classes.get(i - 1),
        }
    }

    pub fn hourly_price(&self, name: &str) -> Option<f64> {
        self.get(name).map(|c| c.hourly_price)
    }
}
