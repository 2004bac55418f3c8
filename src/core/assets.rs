//! Native NFT collections and tokens
//!
//! Collections and NFTs are identified by the hash of the transaction that
//! created them. Minting requires the collection to exist and to be owned by
//! the minter.

use crate::core::transaction::{CollectionTx, MintTx};
use crate::types::{Address, Hash};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Collection already exists: {0}")]
    CollectionExists(Hash),
    #[error("Collection not found: {0}")]
    CollectionNotFound(Hash),
    #[error("{minter} does not own collection {collection}")]
    NotCollectionOwner { collection: Hash, minter: Address },
    #[error("NFT already exists: {0}")]
    NftExists(Hash),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Hash,
    pub owner: Address,
    pub name: String,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub id: Hash,
    pub collection: Hash,
    pub owner: Address,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Default)]
struct Assets {
    collections: HashMap<Hash, Collection>,
    nfts: HashMap<Hash, Nft>,
}

/// Registry of collections and NFTs
#[derive(Debug, Default)]
pub struct AssetRegistry {
    inner: RwLock<Assets>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_collection(
        &self,
        id: Hash,
        owner: Address,
        tx: &CollectionTx,
    ) -> Result<(), AssetError> {
        let mut assets = self.inner.write();
        if assets.collections.contains_key(&id) {
            return Err(AssetError::CollectionExists(id));
        }

        assets.collections.insert(
            id,
            Collection {
                id,
                owner,
                name: tx.name.clone(),
                metadata: tx.metadata.clone(),
            },
        );
        Ok(())
    }

    pub fn mint_nft(&self, id: Hash, minter: Address, tx: &MintTx) -> Result<(), AssetError> {
        let mut assets = self.inner.write();

        let collection = assets
            .collections
            .get(&tx.collection)
            .ok_or(AssetError::CollectionNotFound(tx.collection))?;
        if collection.owner != minter {
            return Err(AssetError::NotCollectionOwner {
                collection: tx.collection,
                minter,
            });
        }
        if assets.nfts.contains_key(&id) {
            return Err(AssetError::NftExists(id));
        }

        assets.nfts.insert(
            id,
            Nft {
                id,
                collection: tx.collection,
                owner: minter,
                metadata: tx.metadata.clone(),
            },
        );
        Ok(())
    }

    /// Undo a collection registration
    pub fn remove_collection(&self, id: &Hash) -> Option<Collection> {
        self.inner.write().collections.remove(id)
    }

    /// Undo an NFT mint
    pub fn remove_nft(&self, id: &Hash) -> Option<Nft> {
        self.inner.write().nfts.remove(id)
    }

    pub fn collection(&self, id: &Hash) -> Option<Collection> {
        self.inner.read().collections.get(id).cloned()
    }

    pub fn nft(&self, id: &Hash) -> Option<Nft> {
        self.inner.read().nfts.get(id).cloned()
    }

    /// NFTs minted into a collection
    pub fn nfts_in(&self, collection: &Hash) -> Vec<Nft> {
        self.inner
            .read()
            .nfts
            .values()
            .filter(|nft| nft.collection == *collection)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection_tx() -> CollectionTx {
        CollectionTx {
            name: "genesis art".to_string(),
            metadata: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_register_and_mint() {
        let registry = AssetRegistry::new();
        let owner = Address([1; 20]);
        let collection_id = Hash([1; 32]);

        registry
            .register_collection(collection_id, owner, &collection_tx())
            .unwrap();
        assert_eq!(
            registry.register_collection(collection_id, owner, &collection_tx()),
            Err(AssetError::CollectionExists(collection_id))
        );

        let mint = MintTx {
            collection: collection_id,
            metadata: b"#1".to_vec(),
        };
        registry.mint_nft(Hash([2; 32]), owner, &mint).unwrap();

        assert_eq!(registry.nfts_in(&collection_id).len(), 1);
        assert_eq!(registry.nft(&Hash([2; 32])).unwrap().owner, owner);
    }

    #[test]
    fn test_mint_requires_owned_collection() {
        let registry = AssetRegistry::new();
        let owner = Address([1; 20]);
        let stranger = Address([2; 20]);
        let collection_id = Hash([1; 32]);

        let mint = MintTx {
            collection: collection_id,
            metadata: vec![],
        };
        assert_eq!(
            registry.mint_nft(Hash([2; 32]), owner, &mint),
            Err(AssetError::CollectionNotFound(collection_id))
        );

        registry
            .register_collection(collection_id, owner, &collection_tx())
            .unwrap();
        assert!(matches!(
            registry.mint_nft(Hash([2; 32]), stranger, &mint),
            Err(AssetError::NotCollectionOwner { .. })
        ));
    }

    #[test]
    fn test_removal_undoes_registration() {
        let registry = AssetRegistry::new();
        let owner = Address([1; 20]);
        let collection_id = Hash([1; 32]);

        registry
            .register_collection(collection_id, owner, &collection_tx())
            .unwrap();
        assert!(registry.remove_collection(&collection_id).is_some());
        assert!(registry.collection(&collection_id).is_none());
        assert!(registry.remove_collection(&collection_id).is_none());
    }
}
