use byteorder::{BigEndian, ByteOrder};
use crypto::digest::Digest;
use crypto::md5::Md5;

/// Location on the 16 bit ring.
pub type RingPosition = u16;

/// Computes where `key` lives on the ring: the first two bytes of its MD5 digest,
/// read big-endian. The narrow space matches the ring the Graphite carbon daemons use,
/// so placements agree with every other member of the cluster.
pub fn compute_ring_position<S>(key: S) -> RingPosition
where
    S: AsRef<str>,
{
    let mut hasher = Md5::new();
    hasher.input_str(key.as_ref());

    let mut digest = [0_u8; 16];
    hasher.result(&mut digest);
    BigEndian::read_u16(&digest[..2])
}

/// The string hashed for the `index`-th virtual node of a ring member.
pub fn replica_key<S: AsRef<str>>(key_value: S, index: usize) -> String {
    format!("{}:{}", key_value.as_ref(), index)
}
