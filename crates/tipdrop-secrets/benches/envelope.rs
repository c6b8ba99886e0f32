use age::x25519;
use tipdrop_secrets::{decrypt_from, encrypt_to};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_two_recipients(bencher: divan::Bencher, size: usize) {
    let recipients = [
        x25519::Identity::generate().to_public(),
        x25519::Identity::generate().to_public(),
    ];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_to(&recipients, divan::black_box(&data[..]), Vec::new()).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let identity = x25519::Identity::generate();
    let data = make_data(size);
    let ciphertext = encrypt_to(&[identity.to_public()], &data[..], Vec::new()).unwrap();
    let identities = [identity];
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_from(&identities, divan::black_box(&ciphertext[..])).unwrap());
}

fn main() {
    divan::main();
}
