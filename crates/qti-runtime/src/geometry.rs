use qti_core::Shape;

pub(crate) fn point_in_shape(shape: Shape, coords: &[f64], point: (f64, f64)) -> bool {
    let (x, y) = point;
    match shape {
        Shape::Default => true,
        Shape::Rect => {
            if coords.len() != 4 {
                return false;
            }
            let (x0, x1) = (coords[0].min(coords[2]), coords[0].max(coords[2]));
            let (y0, y1) = (coords[1].min(coords[3]), coords[1].max(coords[3]));
            x >= x0 && x <= x1 && y >= y0 && y <= y1
        }
        Shape::Circle => {
            if coords.len() != 3 {
                return false;
            }
            let (cx, cy, r) = (coords[0], coords[1], coords[2]);
            (x - cx).hypot(y - cy) <= r
        }
        Shape::Ellipse => {
            if coords.len() != 4 {
                return false;
            }
            let (cx, cy, rx, ry) = (coords[0], coords[1], coords[2], coords[3]);
            if rx == 0.0 || ry == 0.0 {
                return x == cx && y == cy;
            }
            let dx = (x - cx) / rx;
            let dy = (y - cy) / ry;
            dx * dx + dy * dy <= 1.0
        }
        Shape::Poly => point_in_polygon(coords, x, y),
    }
}

/// Ray casting over an even-length coordinate list.
fn point_in_polygon(coords: &[f64], x: f64, y: f64) -> bool {
    if coords.len() < 6 || coords.len() % 2 != 0 {
        return false;
    }
    let count = coords.len() / 2;
    let mut inside = false;
    let mut j = count - 1;
    for i in 0..count {
        let (xi, yi) = (coords[2 * i], coords[2 * i + 1]);
        let (xj, yj) = (coords[2 * j], coords[2 * j + 1]);
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}
