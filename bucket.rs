//! Bucket administration and public-permission toggling.

use tracing::{info, warn};

use crate::error::BridgeCryptError;
use crate::key_manager::KeyPair;
use crate::metadata::{
    Bucket, BucketDetails, BucketSummary, BucketUpdate, Direction, NewBucket, PublicBucket,
};
use crate::session::Session;

/// Which operations anonymous clients may perform on a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicPermissions {
    pub push: bool,
    pub pull: bool,
}

impl PublicPermissions {
    pub const NONE: Self = Self {
        push: false,
        pull: false,
    };

    pub const ALL: Self = Self {
        push: true,
        pull: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.push && !self.pull
    }

    fn directions(&self) -> Vec<Direction> {
        let mut out = Vec::new();
        if self.pull {
            out.push(Direction::Pull);
        }
        if self.push {
            out.push(Direction::Push);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct BucketManager {
    session: Session,
}

impl BucketManager {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Register a bucket under `keys`, the client key pair provisioned with
    /// `KeyManager::load_or_generate`.
    pub async fn create_bucket(
        &self,
        name: &str,
        keys: &KeyPair,
    ) -> Result<Bucket, BridgeCryptError> {
        let request = NewBucket {
            name: name.to_string(),
            pubkeys: vec![keys.public_key()],
        };
        let bucket = self
            .session
            .call(self.session.bridge().create_bucket(request), BridgeCryptError::rejected)
            .await?;
        info!(bucket = %bucket.id, name = %bucket.name, "bucket created");
        Ok(bucket)
    }

    /// Bucket metadata joined with its file listing
    pub async fn get_bucket(&self, bucket_id: &str) -> Result<BucketDetails, BridgeCryptError> {
        let bridge = self.session.bridge();
        let bucket = self
            .session
            .call(bridge.get_bucket(bucket_id), BridgeCryptError::rejected)
            .await?;
        let files = self
            .session
            .call(bridge.list_files(bucket_id), BridgeCryptError::rejected)
            .await?;
        Ok(BucketDetails { bucket, files })
    }

    pub async fn get_buckets(&self) -> Result<Vec<BucketSummary>, BridgeCryptError> {
        let buckets = self
            .session
            .call(self.session.bridge().list_buckets(), BridgeCryptError::rejected)
            .await?;
        Ok(buckets.into_iter().map(BucketSummary::from).collect())
    }

    pub async fn delete_bucket(&self, bucket_id: &str) -> Result<(), BridgeCryptError> {
        self.session
            .call(self.session.bridge().delete_bucket(bucket_id), BridgeCryptError::rejected)
            .await?;
        info!(bucket = bucket_id, "bucket deleted");
        Ok(())
    }

    /// Grant or revoke anonymous access. The result reflects the bucket as
    /// the bridge reports it after the update.
    ///
    /// A bucket that already publishes a key keeps it; a fresh key pair is
    /// generated only when it has none. Revoking both permissions clears
    /// the published key.
    pub async fn make_public(
        &self,
        bucket_id: &str,
        permissions: PublicPermissions,
    ) -> Result<PublicBucket, BridgeCryptError> {
        if permissions.is_empty() {
            return self.publish(bucket_id, permissions, String::new()).await;
        }

        let current = self
            .session
            .call(self.session.bridge().get_bucket(bucket_id), BridgeCryptError::rejected)
            .await?;
        let key = match current.public_key() {
            Some(existing) => existing.to_string(),
            None => {
                warn!(bucket = bucket_id, "bucket has no shared key, generating one");
                KeyPair::generate().private_key().to_string()
            }
        };
        self.publish(bucket_id, permissions, key).await
    }

    /// Publish `keys` as the bucket's shared encryption key
    pub async fn make_public_with_key(
        &self,
        bucket_id: &str,
        permissions: PublicPermissions,
        keys: &KeyPair,
    ) -> Result<PublicBucket, BridgeCryptError> {
        let key = if permissions.is_empty() {
            String::new()
        } else {
            keys.private_key().to_string()
        };
        self.publish(bucket_id, permissions, key).await
    }

    async fn publish(
        &self,
        bucket_id: &str,
        permissions: PublicPermissions,
        key: String,
    ) -> Result<PublicBucket, BridgeCryptError> {
        let update = BucketUpdate {
            public_permissions: permissions.directions(),
            encryption_key: key,
        };
        let bucket = self
            .session
            .call(
                self.session.bridge().update_bucket(bucket_id, update),
                BridgeCryptError::rejected,
            )
            .await?;
        let public = PublicBucket::from(bucket);
        if public.push != permissions.push || public.pull != permissions.pull {
            warn!(
                bucket = bucket_id,
                requested_push = permissions.push,
                requested_pull = permissions.pull,
                push = public.push,
                pull = public.pull,
                "bridge did not apply requested permissions"
            );
        }
        info!(
            bucket = bucket_id,
            push = public.push,
            pull = public.pull,
            "bucket permissions updated"
        );
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_directions() {
        assert!(PublicPermissions::NONE.directions().is_empty());
        assert_eq!(
            PublicPermissions::ALL.directions(),
            vec![Direction::Pull, Direction::Push]
        );
        assert_eq!(
            PublicPermissions {
                push: false,
                pull: true
            }
            .directions(),
            vec![Direction::Pull]
        );
    }
}
