//! Room id allocation
//!
//! Room ids are short upper-case strings players can type. A node either
//! draws them itself and checks them against its own rooms, or asks the load
//! balancer, which then acts as the single allocator for the whole cluster.

use rand::Rng;

use crate::error::{Error, Result};

use super::balancer_link::LoadBalancerLink;

/// Characters room ids are drawn from
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Candidates tried before giving up with `IdExhaustion`
pub const MAX_ID_ATTEMPTS: usize = 64;

/// Where room ids come from
#[derive(Debug, Clone)]
pub enum IdGenerator {
    /// Random ids, unique only against this node's rooms
    Local { length: usize },
    /// Ids issued by the load balancer's `/api/get/id`
    Delegated(LoadBalancerLink),
}

impl IdGenerator {
    pub fn local(length: usize) -> Self {
        IdGenerator::Local { length }
    }

    pub fn delegated(link: LoadBalancerLink) -> Self {
        IdGenerator::Delegated(link)
    }

    /// Produce an id for which `taken` returns false
    pub async fn generate(&self, taken: impl Fn(&str) -> bool) -> Result<String> {
        match self {
            IdGenerator::Local { length } => generate_local(*length, taken),
            IdGenerator::Delegated(link) => {
                for _ in 0..MAX_ID_ATTEMPTS {
                    let id = link.request_id().await?;
                    if id.is_empty() {
                        return Err(Error::Http("load balancer returned an empty id".into()));
                    }
                    if !taken(&id) {
                        return Ok(id);
                    }
                    tracing::warn!(id = %id, "Load balancer issued an id already in use here");
                }
                Err(Error::IdExhaustion {
                    attempts: MAX_ID_ATTEMPTS,
                })
            }
        }
    }
}

/// Draw random ids until one is free, up to [`MAX_ID_ATTEMPTS`] tries
pub fn generate_local(length: usize, taken: impl Fn(&str) -> bool) -> Result<String> {
    let mut rng = rand::rng();

    for _ in 0..MAX_ID_ATTEMPTS {
        let id: String = (0..length)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect();

        if !taken(&id) {
            return Ok(id);
        }
    }

    Err(Error::IdExhaustion {
        attempts: MAX_ID_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_local_id_shape() {
        let id = generate_local(6, |_| false).unwrap();

        assert_eq!(id.len(), 6);
        assert!(id.bytes().all(|b| b.is_ascii_uppercase()));
    }

    #[test]
    fn test_local_id_skips_taken() {
        let attempts = Cell::new(0);
        let id = generate_local(4, |_| {
            attempts.set(attempts.get() + 1);
            attempts.get() < 3
        })
        .unwrap();

        assert_eq!(id.len(), 4);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_exhaustion() {
        // A single-letter space is tiny; pretend everything is taken
        let result = generate_local(1, |_| true);

        assert!(matches!(
            result,
            Err(Error::IdExhaustion {
                attempts: MAX_ID_ATTEMPTS
            })
        ));
    }

    #[tokio::test]
    async fn test_local_generator_avoids_existing() {
        let existing: HashSet<String> = ["AAAA".to_string()].into_iter().collect();
        let generator = IdGenerator::local(4);

        for _ in 0..100 {
            let id = generator.generate(|c| existing.contains(c)).await.unwrap();
            assert_ne!(id, "AAAA");
        }
    }
}
