//! Key encapsulation mechanisms for the hybrid post-quantum suites.
//!
//! The negotiation surface lives here: named parameter sets, the client's
//! offer extension, and the server's preference-ordered selection. Actual
//! KEM arithmetic is behind the [Kem] trait so a backend can be plugged in;
//! none is bundled.

use zeroize::Zeroizing;

use crate::{enum_encoding, TLSError};

/// The KEM family a hybrid cipher suite is tied to. A suite only ever
/// negotiates parameter sets of its own family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KemFamily {
    Bike,
    Sike,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Round {
    Round1,
    Round2,
}

enum_encoding!(
    /// Named KEM parameter sets, identified by the two-byte codes from the
    /// hybrid key exchange drafts.
    pub enum KemId(u16) {
        Bike1Level1R1 = 1,
        Sike503R1 = 10,
        Bike1Level1R2 = 13,
        Sike434R2 = 19,
    }
);

/// An immutable parameter-set descriptor.
#[derive(Debug)]
pub struct KemAlgorithm {
    pub id: KemId,
    pub name: &'static str,
    pub family: KemFamily,
    pub round: Round,
    pub public_key_len: usize,
    pub secret_key_len: usize,
    pub ciphertext_len: usize,
    pub shared_secret_len: usize,
}

pub static BIKE1_L1_R1: KemAlgorithm = KemAlgorithm {
    id: KemId::Bike1Level1R1,
    name: "BIKE1-L1-R1",
    family: KemFamily::Bike,
    round: Round::Round1,
    public_key_len: 2542,
    secret_key_len: 3110,
    ciphertext_len: 2542,
    shared_secret_len: 32,
};

pub static BIKE1_L1_R2: KemAlgorithm = KemAlgorithm {
    id: KemId::Bike1Level1R2,
    name: "BIKE1-L1-R2",
    family: KemFamily::Bike,
    round: Round::Round2,
    public_key_len: 2946,
    secret_key_len: 6460,
    ciphertext_len: 2946,
    shared_secret_len: 32,
};

pub static SIKE_P503_R1: KemAlgorithm = KemAlgorithm {
    id: KemId::Sike503R1,
    name: "SIKE-P503-R1",
    family: KemFamily::Sike,
    round: Round::Round1,
    public_key_len: 378,
    secret_key_len: 434,
    ciphertext_len: 402,
    shared_secret_len: 16,
};

pub static SIKE_P434_R2: KemAlgorithm = KemAlgorithm {
    id: KemId::Sike434R2,
    name: "SIKE-P434-R2",
    family: KemFamily::Sike,
    round: Round::Round2,
    public_key_len: 330,
    secret_key_len: 374,
    ciphertext_len: 346,
    shared_secret_len: 16,
};

pub static ALL_KEMS: &[&KemAlgorithm] = &[&BIKE1_L1_R1, &BIKE1_L1_R2, &SIKE_P503_R1, &SIKE_P434_R2];

/// Round-1 server preference, the default for the `pq-round1` suite tag.
pub static PREFERENCES_ROUND1: &[&KemAlgorithm] = &[&BIKE1_L1_R1, &SIKE_P503_R1];

/// Round-2 sets preferred, round-1 kept for compatibility.
pub static PREFERENCES_ROUND2: &[&KemAlgorithm] =
    &[&BIKE1_L1_R2, &SIKE_P434_R2, &BIKE1_L1_R1, &SIKE_P503_R1];

#[must_use]
pub fn from_id(id: KemId) -> &'static KemAlgorithm {
    ALL_KEMS
        .iter()
        .copied()
        .find(|kem| kem.id == id)
        .expect("every KemId has a descriptor")
}

/// Select the server's most preferred parameter set that the client offered
/// and that belongs to the negotiated suite's family.
pub fn select(
    family: KemFamily,
    server_preferences: &[&'static KemAlgorithm],
    client_offer: &[KemId],
) -> Result<&'static KemAlgorithm, TLSError> {
    server_preferences
        .iter()
        .copied()
        .find(|kem| kem.family == family && client_offer.contains(&kem.id))
        .ok_or(TLSError::KemUnsupported)
}

/// A keypair held by the server while its encapsulation is in flight.
pub struct KemKeypair {
    pub algorithm: &'static KemAlgorithm,
    pub public_key: Vec<u8>,
    pub secret_key: Zeroizing<Vec<u8>>,
}

/// A pluggable KEM backend.
pub trait Kem {
    fn algorithm(&self) -> &'static KemAlgorithm;

    /// Whether the backend is compiled in and operational.
    fn available(&self) -> bool;

    fn generate_keypair(&self) -> Result<KemKeypair, TLSError>;

    /// Encapsulate to `public_key`; returns `(ciphertext, shared_secret)`.
    fn encapsulate(&self, public_key: &[u8]) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), TLSError>;

    fn decapsulate(
        &self,
        keypair: &KemKeypair,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, TLSError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_OFFER: &[KemId] = &[
        KemId::Bike1Level1R1,
        KemId::Bike1Level1R2,
        KemId::Sike503R1,
        KemId::Sike434R2,
    ];

    #[test]
    fn round1_server_picks_round1_sets() {
        let bike = select(KemFamily::Bike, PREFERENCES_ROUND1, CLIENT_OFFER).unwrap();
        assert_eq!(bike.id, KemId::Bike1Level1R1);

        let sike = select(KemFamily::Sike, PREFERENCES_ROUND1, CLIENT_OFFER).unwrap();
        assert_eq!(sike.id, KemId::Sike503R1);
    }

    #[test]
    fn disjoint_rounds_fail_to_negotiate() {
        let round2_only = &[KemId::Bike1Level1R2, KemId::Sike434R2];
        assert!(matches!(
            select(KemFamily::Bike, PREFERENCES_ROUND1, round2_only),
            Err(TLSError::KemUnsupported)
        ));
        assert!(matches!(
            select(KemFamily::Sike, PREFERENCES_ROUND1, round2_only),
            Err(TLSError::KemUnsupported)
        ));
    }

    #[test]
    fn family_mismatch_never_selects() {
        let sike_only = &[KemId::Sike503R1];
        assert!(select(KemFamily::Bike, PREFERENCES_ROUND1, sike_only).is_err());
    }

    #[test]
    fn server_preference_order_wins() {
        let preferences: &[&KemAlgorithm] = &[&SIKE_P434_R2, &SIKE_P503_R1];
        let selected = select(KemFamily::Sike, preferences, CLIENT_OFFER).unwrap();
        assert_eq!(selected.id, KemId::Sike434R2);
    }

    #[test]
    fn ids_resolve_to_descriptors() {
        for kem in ALL_KEMS {
            assert!(std::ptr::eq(from_id(kem.id), *kem));
        }
    }
}
