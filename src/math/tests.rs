use crate::math::curve::{Secp256k1, N};
use crate::math::field::{FieldElement, P};
use crate::types::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 2^256 - 1 mod p = c - 1.
const MAX_U256_MOD_P: [u64; 4] = [0x1_0000_03D0, 0, 0, 0];

fn boundary_elements() -> Vec<FieldElement> {
    vec![
        FieldElement::ZERO,
        FieldElement::ONE,
        FieldElement::from_limbs([P[0] - 1, P[1], P[2], P[3]]),
        FieldElement::from_limbs(MAX_U256_MOD_P),
    ]
}

/// Random canonical element (top bit clear keeps it below p).
fn random_fe(rng: &mut StdRng) -> FieldElement {
    let mut limbs = [0u64; 4];
    for l in limbs.iter_mut() {
        *l = rng.gen();
    }
    limbs[3] &= 0x7FFF_FFFF_FFFF_FFFF;
    FieldElement::from_limbs(limbs)
}

fn is_canonical(fe: &FieldElement) -> bool {
    for i in (0..4).rev() {
        if fe.limbs[i] < P[i] {
            return true;
        }
        if fe.limbs[i] > P[i] {
            return false;
        }
    }
    false
}

/// Inputs that stress the divstep elimination: extreme trailing-zero runs
/// and bit patterns that force the longest digit sequences.
fn adversarial_elements() -> Vec<FieldElement> {
    let mut out = vec![
        FieldElement::ONE,
        FieldElement::from_u64(2),
        FieldElement::from_u64(977),
        FieldElement::from_u64(0x1_0000_03D1),
        FieldElement::from_limbs([P[0] - 1, P[1], P[2], P[3]]),
        FieldElement::from_limbs([P[0] - 2, P[1], P[2], P[3]]),
        FieldElement::from_limbs([0x5555_5555_5555_5555; 4]),
        FieldElement::from_limbs([
            0xAAAA_AAAA_AAAA_AAAA,
            0xAAAA_AAAA_AAAA_AAAA,
            0xAAAA_AAAA_AAAA_AAAA,
            0x2AAA_AAAA_AAAA_AAAA,
        ]),
    ];
    for k in [1u32, 29, 30, 31, 63, 64, 127, 128, 191, 254, 255] {
        let mut limbs = [0u64; 4];
        limbs[(k / 64) as usize] = 1u64 << (k % 64);
        out.push(FieldElement::from_limbs(limbs));
    }
    out
}

#[test]
fn add_neg_cancels() {
    let mut rng = StdRng::seed_from_u64(0xF1E1D);
    let mut cases = boundary_elements();
    cases.extend((0..200).map(|_| random_fe(&mut rng)));
    for a in cases {
        assert_eq!(a.add(&a.neg()), FieldElement::ZERO, "a = {}", a);
    }
}

#[test]
fn mul_inv_identity() {
    let mut rng = StdRng::seed_from_u64(0x1237);
    let mut cases = adversarial_elements();
    cases.extend((0..200).map(|_| random_fe(&mut rng)));
    for a in cases {
        if a.is_zero() {
            continue;
        }
        let inv = a.inv();
        assert!(is_canonical(&inv), "inv not canonical for a = {}", a);
        assert_eq!(a.mul(&inv), FieldElement::ONE, "a = {}", a);
    }
}

#[test]
fn sqr_matches_mul() {
    let mut rng = StdRng::seed_from_u64(0x5142);
    let mut cases = boundary_elements();
    cases.extend(adversarial_elements());
    cases.extend((0..200).map(|_| random_fe(&mut rng)));
    for a in cases {
        assert_eq!(a.sqr(), a.mul(&a), "a = {}", a);
    }
}

#[test]
fn results_stay_canonical() {
    let mut rng = StdRng::seed_from_u64(0x9);
    let mut cases = boundary_elements();
    cases.extend((0..100).map(|_| random_fe(&mut rng)));
    for a in &cases {
        for b in &cases {
            assert!(is_canonical(&a.add(b)));
            assert!(is_canonical(&a.sub(b)));
            assert!(is_canonical(&a.mul(b)));
        }
        assert!(is_canonical(&a.neg()));
        assert!(is_canonical(&a.sqr()));
    }
}

#[test]
fn mul_is_commutative_and_distributive() {
    let mut rng = StdRng::seed_from_u64(0xD157);
    for _ in 0..100 {
        let a = random_fe(&mut rng);
        let b = random_fe(&mut rng);
        let c = random_fe(&mut rng);
        assert_eq!(a.mul(&b), b.mul(&a));
        assert_eq!(a.mul(&b.add(&c)), a.mul(&b).add(&a.mul(&c)));
    }
}

#[test]
fn mul_known_answers() {
    let vectors: [([u64; 4], [u64; 4], [u64; 4]); 4] = [
        (
            [0x61790134676B1B69, 0x9974D75B333824FE, 0x3AF27F802DC5FD3D, 0x221C4E003F9931EE],
            [0x162A01DEC28753F8, 0xBAA1C6F1404B6EAF, 0x87E355B26210B784, 0xB35331CEAF2ED9DD],
            [0x50AB685FC93C3799, 0x87BC02AAC12183C3, 0xD73E0D9917534742, 0xB636BE9CE4FAC024],
        ),
        (
            [0x16FF82E389E3995A, 0x9FB932D4F0397722, 0x331057CA7D411FAB, 0xB8E3C71F6BF08D62],
            [0x96A1DA2C9CFBBA43, 0xCAE8C077377925B3, 0xC9CF158DE6E96D45, 0xD283EB3A5FBD238E],
            [0xAB29B2FEC7D1E038, 0x6C0A1401996CEAD7, 0x8EFF1D7A6AADED5D, 0x5FD4B49B1EE648BE],
        ),
        (
            [0xDC8AC0BB635B4C41, 0x366C5ACDAEAFB905, 0x7623C4DD26FB984F, 0x2DD301C8A91AFA5C],
            [0x91215785D9977338, 0x153D3A3F56BC09CB, 0xB7785728F2655B19, 0xAD689CF88759F153],
            [0xA648CF253DFA7CF7, 0xCE4EDD5AD62BBC54, 0x2217652C6E08416B, 0x6F3855DAE74FCD31],
        ),
        // (p-1)^2 = 1
        (
            [0xFFFFFFFEFFFFFC2E, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF],
            [0xFFFFFFFEFFFFFC2E, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF],
            [0x0000000000000001, 0, 0, 0],
        ),
    ];
    for (a, b, want) in vectors {
        let a = FieldElement::from_limbs(a);
        let b = FieldElement::from_limbs(b);
        assert_eq!(a.mul(&b), FieldElement::from_limbs(want));
    }
}

#[test]
fn inv_known_answers() {
    let vectors: [([u64; 4], [u64; 4]); 4] = [
        (
            [2, 0, 0, 0],
            [0xFFFFFFFF7FFFFE18, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0x7FFFFFFFFFFFFFFF],
        ),
        // p-1 is its own inverse
        (
            [0xFFFFFFFEFFFFFC2E, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF],
            [0xFFFFFFFEFFFFFC2E, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF],
        ),
        (
            [0x00000001000003D1, 0, 0, 0],
            [0xD838091D0868192A, 0xBCB223FEDC24A059, 0x9C46C2C295F2B761, 0xC9BD190515538399],
        ),
        (
            [0x167A34D0C643E653, 0x50FE32817812F170, 0x0AEB34F967124890, 0x8ED5F03644F758CD],
            [0x63EC11F5B87D45CD, 0x31A48D55257C9757, 0x920E9EAE9D02A4D8, 0x46A64BD82127F741],
        ),
    ];
    for (a, want) in vectors {
        assert_eq!(FieldElement::from_limbs(a).inv(), FieldElement::from_limbs(want));
    }
}

#[test]
fn generator_on_curve() {
    let curve = Secp256k1::new();
    assert!(curve.is_on_curve(&curve.g));
    assert!(!curve.is_on_curve(&Point::ZERO));
}

#[test]
fn scalar_mul_known_answers() {
    let curve = Secp256k1::new();
    let vectors: [([u64; 4], [u64; 4], [u64; 4]); 3] = [
        (
            [2, 0, 0, 0],
            [0xABAC09B95C709EE5, 0x5C778E4B8CEF3CA7, 0x3045406E95C07CD8, 0xC6047F9441ED7D6D],
            [0x236431A950CFE52A, 0xF7F632653266D0E1, 0xA3C58419466CEAEE, 0x1AE168FEA63DC339],
        ),
        (
            [7, 0, 0, 0],
            [0xE92BDDEDCAC4F9BC, 0x3D419B7E0330E39C, 0xA398F365F2EA7A0E, 0x5CBDF0646E5DB4EA],
            [0xA5082628087264DA, 0xA813D0B813FDE7B5, 0xA3178D6D861A54DB, 0x6AEBCA40BA255960],
        ),
        (
            [0xDEADBEEF, 0, 0, 0],
            [0x2A238C1BAA560F0E, 0xBA6D482E54F47C6C, 0x556F4DF94EC84CEF, 0x76D2FDF1302D1FA9],
            [0xEBB655B5CFD54D8A, 0x57F32053EB015DFF, 0x4184CB451A4F5FB5, 0xB754AC7E7A3E09C4],
        ),
    ];
    for (k, x, y) in vectors {
        let p = curve.mul_g(&k);
        assert_eq!(p.x, FieldElement::from_limbs(x));
        assert_eq!(p.y, FieldElement::from_limbs(y));
        assert!(curve.is_on_curve(&p));
    }
}

#[test]
fn group_order_annihilates() {
    let curve = Secp256k1::new();
    assert!(curve.mul_g(&N).is_zero());
    // (n-1)*G = -G
    let n_minus_1 = [N[0] - 1, N[1], N[2], N[3]];
    assert_eq!(curve.mul_g(&n_minus_1), curve.negate(&curve.g));
}

#[test]
fn addition_laws() {
    let curve = Secp256k1::new();
    let g = curve.g;
    let g2 = curve.double(&g);
    let g7 = curve.mul_g(&[7, 0, 0, 0]);
    // 7G = 2G + 2G + 2G + G
    let acc = curve.add(&curve.add(&curve.add(&g2, &g2), &g2), &g);
    assert_eq!(acc, g7);
    // P + (-P) is the identity, identity is absorbed
    assert!(curve.add(&g, &curve.negate(&g)).is_zero());
    assert_eq!(curve.add(&Point::ZERO, &g), g);
    assert_eq!(curve.add(&g, &Point::ZERO), g);
}
