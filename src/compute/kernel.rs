use crate::store::Op;
use wide::f64x4;

/// `dest += a * src`, vectorized four lanes at a time.
#[inline(always)]
pub fn axpy(dest: &mut [f64], a: f64, src: &[f64]) {
    let av = f64x4::splat(a);
    let mut d_chunks = dest.chunks_exact_mut(4);
    let mut s_chunks = src.chunks_exact(4);
    for (d, s) in (&mut d_chunks).zip(&mut s_chunks) {
        let dv = f64x4::from([d[0], d[1], d[2], d[3]]);
        let sv = f64x4::from([s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&(dv + av * sv).to_array());
    }
    for (d, s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
        *d += a * s;
    }
}

#[inline(always)]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline(always)]
fn map_into(dest: &mut [f64], src: &[f64], f: impl Fn(f64) -> f64) {
    for (d, &s) in dest.iter_mut().zip(src) {
        *d = f(s);
    }
}

#[inline(always)]
fn zip_into(dest: &mut [f64], a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) {
    for ((d, &x), &y) in dest.iter_mut().zip(a).zip(b) {
        *d = f(x, y);
    }
}

/// Evaluates one instruction into `dest`.
///
/// `Input` and `Target` are seeded by the engine and are no-ops here.
pub fn forward(op: Op, params: &[f64], srcs: &[&[f64]], dest: &mut [f64]) {
    match op {
        Op::Linear | Op::Output => {
            dest.fill(params[srcs.len()]);
            for (&w, src) in params.iter().zip(srcs) {
                axpy(dest, w, src);
            }
        }
        Op::Exp => map_into(dest, srcs[0], f64::exp),
        Op::Log => map_into(dest, srcs[0], f64::ln),
        Op::Mod => map_into(dest, srcs[0], f64::abs),
        Op::Pow => {
            let p = params[0];
            map_into(dest, srcs[0], |v| v.powf(p));
        }
        Op::Div => zip_into(dest, srcs[0], srcs[1], |a, b| a / b),
        Op::Mult => zip_into(dest, srcs[0], srcs[1], |a, b| a * b),
        Op::Objective => zip_into(dest, srcs[0], srcs[1], |o, t| (o - t) * (o - t)),
        Op::Input { .. } | Op::Target => {}
    }
}

/// Back-propagates `grad` (dL/d`out`) through one instruction.
///
/// `dsrcs[k]` receives dL/d`srcs[k]` and must be zeroed by the caller;
/// `dparams` receives dL/d`params`.
pub fn backward(
    op: Op,
    params: &[f64],
    srcs: &[&[f64]],
    out: &[f64],
    grad: &[f64],
    dsrcs: &mut [Vec<f64>],
    dparams: &mut [f64],
) {
    match op {
        Op::Linear | Op::Output => {
            let n = srcs.len();
            for k in 0..n {
                dparams[k] = dot(grad, srcs[k]);
                axpy(&mut dsrcs[k], params[k], grad);
            }
            dparams[n] = grad.iter().sum();
        }
        Op::Exp => zip_into(&mut dsrcs[0], grad, out, |g, y| g * y),
        Op::Log => zip_into(&mut dsrcs[0], grad, srcs[0], |g, x| g / x),
        Op::Mod => zip_into(&mut dsrcs[0], grad, srcs[0], |g, x| {
            if x > 0.0 { g } else if x < 0.0 { -g } else { 0.0 }
        }),
        Op::Pow => {
            let p = params[0];
            zip_into(&mut dsrcs[0], grad, srcs[0], |g, x| g * p * x.powf(p - 1.0));
            // The exponent gradient only exists on the positive half-line.
            dparams[0] = grad
                .iter()
                .zip(srcs[0])
                .zip(out)
                .filter(|((_, &x), _)| x > 0.0)
                .map(|((&g, &x), &y)| g * y * x.ln())
                .sum();
        }
        Op::Div => {
            let (a, b) = (srcs[0], srcs[1]);
            zip_into(&mut dsrcs[0], grad, b, |g, y| g / y);
            for i in 0..grad.len() {
                dsrcs[1][i] = -grad[i] * a[i] / (b[i] * b[i]);
            }
        }
        Op::Mult => {
            zip_into(&mut dsrcs[0], grad, srcs[1], |g, y| g * y);
            zip_into(&mut dsrcs[1], grad, srcs[0], |g, x| g * x);
        }
        Op::Objective => {
            zip_into(&mut dsrcs[0], srcs[0], srcs[1], |o, t| 2.0 * (o - t));
            for i in 0..grad.len() {
                dsrcs[0][i] *= grad[i];
                dsrcs[1][i] = -dsrcs[0][i];
            }
        }
        Op::Input { .. } | Op::Target => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_axpy_handles_remainder() {
        let mut dest = vec![1.0; 7];
        let src: Vec<f64> = (0..7).map(|i| i as f64).collect();
        axpy(&mut dest, 2.0, &src);
        assert_eq!(dest, vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
    }

    #[test]
    fn test_linear_forward_uses_trailing_bias() {
        let a = [1.0, 2.0];
        let b = [10.0, 20.0];
        let mut dest = [0.0; 2];
        forward(Op::Linear, &[1.0, -1.0, 0.5], &[&a, &b], &mut dest);
        assert_eq!(dest, [-8.5, -17.5]);
    }

    #[rstest]
    #[case(Op::Exp, vec![], 0.3)]
    #[case(Op::Log, vec![], 1.7)]
    #[case(Op::Mod, vec![], -0.8)]
    #[case(Op::Pow, vec![0.5], 2.3)]
    #[case(Op::Pow, vec![-1.0], -1.9)]
    fn test_unary_backward_matches_finite_difference(
        #[case] op: Op,
        #[case] params: Vec<f64>,
        #[case] x: f64,
    ) {
        let h = 1e-6;
        let eval = |v: f64| {
            let mut out = [0.0];
            forward(op, &params, &[&[v]], &mut out);
            out[0]
        };
        let mut out = [0.0];
        forward(op, &params, &[&[x]], &mut out);

        let mut dsrcs = vec![vec![0.0]];
        let mut dparams = vec![0.0; params.len()];
        backward(op, &params, &[&[x]], &out, &[1.0], &mut dsrcs, &mut dparams);

        let numeric = (eval(x + h) - eval(x - h)) / (2.0 * h);
        assert!((dsrcs[0][0] - numeric).abs() < 1e-5, "{:?}: {} vs {}", op, dsrcs[0][0], numeric);
    }

    #[test]
    fn test_pow_exponent_gradient_on_positive_base() {
        let x = [2.0];
        let mut out = [0.0];
        forward(Op::Pow, &[3.0], &[&x], &mut out);
        let mut dsrcs = vec![vec![0.0]];
        let mut dparams = vec![0.0];
        backward(Op::Pow, &[3.0], &[&x], &out, &[1.0], &mut dsrcs, &mut dparams);

        assert!((dparams[0] - 8.0 * 2f64.ln()).abs() < 1e-12);
        assert!((dsrcs[0][0] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_binary_backward() {
        let a = [3.0];
        let b = [2.0];
        let mut dsrcs = vec![vec![0.0], vec![0.0]];
        backward(Op::Div, &[], &[&a, &b], &[1.5], &[1.0], &mut dsrcs, &mut []);
        assert_eq!(dsrcs[0][0], 0.5);
        assert_eq!(dsrcs[1][0], -0.75);

        let mut dsrcs = vec![vec![0.0], vec![0.0]];
        backward(Op::Mult, &[], &[&a, &b], &[6.0], &[2.0], &mut dsrcs, &mut []);
        assert_eq!(dsrcs[0][0], 4.0);
        assert_eq!(dsrcs[1][0], 6.0);
    }

    #[test]
    fn test_objective_gradient() {
        let o = [3.0, 1.0];
        let t = [1.0, 1.0];
        let mut out = [0.0; 2];
        forward(Op::Objective, &[], &[&o, &t], &mut out);
        assert_eq!(out, [4.0, 0.0]);

        let mut dsrcs = vec![vec![0.0; 2], vec![0.0; 2]];
        backward(Op::Objective, &[], &[&o, &t], &out, &[0.5, 0.5], &mut dsrcs, &mut []);
        assert_eq!(dsrcs[0], vec![2.0, 0.0]);
        assert_eq!(dsrcs[1], vec![-2.0, 0.0]);
    }
}
