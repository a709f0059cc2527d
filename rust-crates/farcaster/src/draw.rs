use rand::Rng;

/// Uniform index in `[0, len)` computed as `floor(random() * len)`.
pub fn draw_index<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let sample: f64 = rng.random();
    let index = (sample * len as f64).floor() as usize;
    Some(index.min(len - 1))
}

/// Picks one element uniformly at random; `None` for an empty slice.
pub fn draw_winner<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    draw_index(items.len(), rng).and_then(|index| items.get(index))
}
