use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("the {entity} name must be from {min} to {max} characters long")]
pub struct InvalidName {
    pub entity: &'static str,
    pub min: usize,
    pub max: usize,
}

/// Inclusive length bounds for a user supplied name, counted in characters.
#[derive(Debug, Clone, Copy)]
pub struct NameBounds {
    entity: &'static str,
    min: usize,
    max: usize,
}

pub const PROJECT_NAME: NameBounds = NameBounds::new("project", 8, 20);
pub const ENVIRONMENT_NAME: NameBounds = NameBounds::new("environment", 3, 20);
pub const FLAG_NAME: NameBounds = NameBounds::new("flag", 4, 20);
pub const KEY_NAME: NameBounds = NameBounds::new("key", 4, 20);

impl NameBounds {
    const fn new(entity: &'static str, min: usize, max: usize) -> Self {
        Self { entity, min, max }
    }

    pub fn check(&self, name: &str) -> Result<(), InvalidName> {
        let length = name.chars().count();
        if (self.min..=self.max).contains(&length) {
            Ok(())
        } else {
            Err(InvalidName {
                entity: self.entity,
                min: self.min,
                max: self.max,
            })
        }
    }
}
