//! Head layout: reshaping between channel and per-head tensor layouts

use burn::prelude::*;

/// Split a channel-layout tensor `[batch, tokens, heads * head_dim]` into
/// kernel layout `[batch, heads, tokens, head_dim]`.
///
/// Pure reshape/transpose with no numeric effect. The channel dimension must
/// divide evenly into `heads`; anything else is a caller bug.
pub fn split_heads<B: Backend>(x: Tensor<B, 3>, heads: usize) -> Tensor<B, 4> {
    let [batch, tokens, channels] = x.dims();
    assert_eq!(
        channels % heads,
        0,
        "channel dimension {} does not divide into {} heads",
        channels,
        heads
    );
    let head_dim = channels / heads;

    x.reshape([batch, tokens, heads, head_dim]).swap_dims(1, 2)
}

/// Merge a kernel-layout tensor `[batch, heads, tokens, head_dim]` back into
/// channel layout `[batch, tokens, heads * head_dim]`.
///
/// Exactly inverts [`split_heads`].
pub fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, heads, tokens, head_dim] = x.dims();

    x.swap_dims(1, 2).reshape([batch, tokens, heads * head_dim])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_split_heads_shape() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([2, 16, 64], &device);

        let split = split_heads(x, 8);
        assert_eq!(split.dims(), [2, 8, 16, 8]);
    }

    #[test]
    fn test_split_merge_round_trip() {
        let device = Default::default();
        let values: Vec<f32> = (0..2 * 4 * 12).map(|i| i as f32).collect();
        let x = Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device)
            .reshape([2, 4, 12]);

        let round_trip = merge_heads(split_heads(x.clone(), 3));

        let expected: Vec<f32> = x.into_data().to_vec().unwrap();
        let actual: Vec<f32> = round_trip.into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    #[should_panic(expected = "does not divide")]
    fn test_split_heads_indivisible() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([1, 4, 10], &device);
        let _ = split_heads(x, 3);
    }
}
