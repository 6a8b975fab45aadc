//! format.rs
//! Conversión de los campos crudos de KPI a texto de tarjeta.

/// Segundos → minutos con un decimal (340 → "5.7"); mitades hacia arriba
pub fn eta_minutes(seconds: f64) -> String {
    format!("{:.1}", (seconds / 60.0 * 10.0).round() / 10.0)
}

/// Separador de miles sin recortar decimales (1234567.25 → "1,234,567.25")
pub fn grouped(value: f64) -> String {
    if !value.is_finite() {
        return "-".into();
    }
    let raw = value.to_string();
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut out = String::with_capacity(raw.len() + int_part.len() / 3);
    out.push_str(sign);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(f) = frac_part {
        out.push('.');
        out.push_str(f);
    }
    out
}
