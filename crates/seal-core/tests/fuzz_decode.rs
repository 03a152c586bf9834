use bytes::Bytes;
use rand::{thread_rng, Rng};
use seal_core::{Frame, FRAME_OVERHEAD, MAX_FRAME_SIZE, TAG_LEN};

#[test]
fn fuzz_decode_frame_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..2048);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let result = Frame::decode(Bytes::from(data));
        if len < FRAME_OVERHEAD {
            assert!(result.is_err());
        } else {
            let frame = result.unwrap();
            assert_eq!(frame.ciphertext.len(), len - FRAME_OVERHEAD);
        }
    }
}

#[test]
fn random_mutation_of_valid_frame_keeps_length() {
    let mut rng = thread_rng();
    let frame = Frame::new(99, vec![0x45; 40], [0u8; TAG_LEN]);
    let wire = frame.encode().to_vec();

    for _ in 0..1_000 {
        let mut mutated = wire.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        let decoded = Frame::decode(Bytes::from(mutated)).unwrap();
        assert_eq!(decoded.wire_len(), wire.len());
    }
}

#[test]
fn oversized_datagram_is_rejected() {
    let data = vec![0u8; MAX_FRAME_SIZE + 1];
    assert!(Frame::decode(Bytes::from(data)).is_err());
}
