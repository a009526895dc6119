//! Helpers that seed initial group membership across a population.

use rand::Rng;

use crate::{Peer, PeerError};

/// Every peer joins every other peer.
pub async fn connect_all(peers: &[Peer]) -> Result<(), PeerError> {
    for peer in peers {
        for other in peers {
            peer.join(other.address()).await?;
        }
    }
    Ok(())
}

/// Each peer joins its successor, and the last joins the first.
pub async fn connect_linked(peers: &[Peer]) -> Result<(), PeerError> {
    if peers.len() < 2 {
        return Ok(());
    }
    for (index, peer) in peers.iter().enumerate() {
        let next = &peers[(index + 1) % peers.len()];
        peer.join(next.address()).await?;
    }
    Ok(())
}

/// Each ordered pair is joined with probability `probability`, which must
/// lie in `[0, 1]`; NaN and out-of-range values are a config error.
pub async fn connect_random<R: Rng + ?Sized>(
    peers: &[Peer],
    probability: f64,
    rng: &mut R,
) -> Result<(), PeerError> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(PeerError::Config(format!(
            "link probability must be within [0, 1], got {probability}"
        )));
    }
    for peer in peers {
        for other in peers {
            if peer.address() != other.address() && rng.gen_bool(probability) {
                peer.join(other.address()).await?;
            }
        }
    }
    Ok(())
}
