use secrecy::SecretString;
use tipdrop_crypto::{IdentityDeriver, KdfParams};

const PASSPHRASE: &str = "correct horse battery staple unicorn falcon lantern";

#[divan::bench(args = [1024, 16384, 65536])]
fn bench_derive_identity(bencher: divan::Bencher, mem_cost_kib: u32) {
    let params = KdfParams {
        mem_cost_kib,
        time_cost: 3,
        parallelism: 1,
    };
    let deriver = IdentityDeriver::with_salts("bench-identifier-salt", "bench-keypair-salt", &params)
        .unwrap();
    let passphrase = SecretString::from(PASSPHRASE);
    bencher.bench(|| deriver.derive(divan::black_box(&passphrase)).unwrap());
}

fn main() {
    divan::main();
}
