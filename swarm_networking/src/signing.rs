// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Relay request authentication: every node-to-node request carries the
//! sender's base32z address and a base64 ed25519 signature over the
//! SHA-512 of the request body.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use swarm_protocol::{
    messages::{SNODE_PUBKEY_HEADER, SNODE_SIGNATURE_HEADER},
    NodePubkey, SnodeAddress,
};

/// Signs outbound relay requests with this node's long-term ed25519 key.
pub struct RequestSigner {
    key: SigningKey,
    address: SnodeAddress,
}

impl RequestSigner {
    /// Build a signer from the node's ed25519 secret and published address.
    pub fn new(secret: [u8; 32], address: SnodeAddress) -> Self {
        Self {
            key: SigningKey::from_bytes(&secret),
            address,
        }
    }

    /// The matching public key, as peers will see it in the registry.
    pub fn public_key(&self) -> NodePubkey {
        NodePubkey::new(self.key.verifying_key().to_bytes())
    }

    /// The address other nodes will find this node under.
    pub fn address(&self) -> &SnodeAddress {
        &self.address
    }

    /// The two relay headers for a request with the given body.
    pub fn sign_headers(&self, body: &[u8]) -> Vec<(&'static str, String)> {
        let digest = Sha512::digest(body);
        let signature = self.key.sign(digest.as_slice());
        vec![
            (SNODE_PUBKEY_HEADER, self.address.to_string()),
            (SNODE_SIGNATURE_HEADER, BASE64.encode(signature.to_bytes())),
        ]
    }
}

/// Check a relay signature against the claimed sender's ed25519 key.
pub fn verify_signature(pubkey: &NodePubkey, body: &[u8], signature_b64: &str) -> bool {
    let Ok(raw) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&raw) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(pubkey.as_bytes()) else {
        return false;
    };
    let digest = Sha512::digest(body);
    key.verify(digest.as_slice(), &signature).is_ok()
}
