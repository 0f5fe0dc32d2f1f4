use crate::types::{GeoidError, GeoidResult, GridAxes, SPACING_TOLERANCE_DEG};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Coordinates are deduplicated on this lattice (degrees)
const COORD_QUANTUM: f64 = 1e-7;

/// Upper bound on lattice nodes per distinct coordinate found in a file
const MAX_FILL_FACTOR: usize = 4;

/// One gridded layer with its axes
#[derive(Debug, Clone)]
pub struct GridLayer {
    pub axes: GridAxes,
    pub values: Array2<f64>,
}

/// Reader for regular lon/lat grids stored as `lon lat value` rows
#[derive(Debug, Clone, Default)]
pub struct GridReader {
    nodata: Option<f64>,
}

impl GridReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat this value as missing in addition to NaN
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Read a grid file, dispatching on the extension. `.tif`/`.tiff` go
    /// through GDAL when the `geotiff` feature is enabled; anything else is
    /// parsed as XYZ text, gzip-compressed when it ends in `.gz`.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> GeoidResult<GridLayer> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            #[cfg(feature = "geotiff")]
            "tif" | "tiff" => self.read_geotiff(path),
            #[cfg(not(feature = "geotiff"))]
            "tif" | "tiff" => Err(GeoidError::InvalidFormat(format!(
                "{}: GeoTIFF input needs the `geotiff` feature",
                path.display()
            ))),
            _ => self.read_xyz(path),
        }
    }

    /// Read an XYZ text grid, optionally gzip-compressed
    pub fn read_xyz<P: AsRef<Path>>(&self, path: P) -> GeoidResult<GridLayer> {
        let path = path.as_ref();
        log::info!("Reading XYZ grid: {}", path.display());

        let file = File::open(path)?;
        let is_gz = path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("gz"));

        let label = path.display().to_string();
        if is_gz {
            self.parse_xyz(BufReader::new(GzDecoder::new(file)), &label)
        } else {
            self.parse_xyz(BufReader::new(file), &label)
        }
    }

    /// Read a layer that must sit on exactly the given axes
    pub fn read_on_axes<P: AsRef<Path>>(&self, path: P, axes: &GridAxes) -> GeoidResult<Array2<f64>> {
        let path = path.as_ref();
        let layer = self.read(path)?;
        let label = path.display().to_string();

        if layer.axes.shape() != axes.shape() {
            return Err(GeoidError::ShapeMismatch {
                layer: label,
                expected: axes.shape(),
                got: layer.axes.shape(),
            });
        }

        let aligned = |a: &[f64], b: &[f64]| {
            a.iter()
                .zip(b)
                .all(|(x, y)| (x - y).abs() <= SPACING_TOLERANCE_DEG)
        };
        if !aligned(&layer.axes.lons, &axes.lons) || !aligned(&layer.axes.lats, &axes.lats) {
            return Err(GeoidError::InvalidGrid(format!(
                "{} is not co-registered with the geoid grid; resample it first",
                label
            )));
        }

        Ok(layer.values)
    }

    /// Parse `lon lat value` rows into a regular lattice.
    ///
    /// Fields may be separated by whitespace, commas or semicolons. Blank
    /// lines and `#` comments are ignored, as is one leading header line.
    /// Lattice nodes with no row are NaN.
    pub fn parse_xyz<R: BufRead>(&self, reader: R, label: &str) -> GeoidResult<GridLayer> {
        let mut rows: Vec<(f64, f64, f64)> = Vec::new();
        let mut header_skipped = false;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|s| !s.is_empty())
                .collect();

            match parse_row(&fields) {
                Some(row) => rows.push(row),
                None if rows.is_empty() && !header_skipped => {
                    log::debug!("{}: skipping header line: {}", label, line);
                    header_skipped = true;
                }
                None => {
                    return Err(GeoidError::InvalidFormat(format!(
                        "{}: line {}: expected `lon lat value`, got '{}'",
                        label,
                        line_no + 1,
                        line
                    )));
                }
            }
        }

        if rows.is_empty() {
            return Err(GeoidError::InvalidFormat(format!("{}: no data rows", label)));
        }

        let lons = lattice_axis("longitude", rows.iter().map(|r| r.0), label)?;
        let lats = lattice_axis("latitude", rows.iter().map(|r| r.1), label)?;
        let axes = GridAxes::from_coordinates(lons, lats)?;

        let lon0 = axes.lons[0];
        let lat0 = axes.lats[0];
        let dx = axes.dx_deg;
        let mut values = Array2::from_elem(axes.shape(), f64::NAN);
        let mut duplicates = 0usize;

        for &(lon, lat, value) in &rows {
            let i = ((lat - lat0) / dx).round() as usize;
            let j = ((lon - lon0) / dx).round() as usize;
            if !values[[i, j]].is_nan() {
                duplicates += 1;
            }
            values[[i, j]] = if self.is_nodata(value) { f64::NAN } else { value };
        }

        if duplicates > 0 {
            log::warn!("{}: {} duplicate nodes, last value kept", label, duplicates);
        }
        let missing = values.iter().filter(|v| v.is_nan()).count();
        log::info!(
            "Loaded {}x{} grid ({}° spacing, {} missing cells) from {}",
            axes.lats.len(),
            axes.lons.len(),
            dx,
            missing,
            label
        );

        Ok(GridLayer { axes, values })
    }

    /// Read the first band of a north-up GeoTIFF into ascending-latitude rows
    #[cfg(feature = "geotiff")]
    pub fn read_geotiff<P: AsRef<Path>>(&self, path: P) -> GeoidResult<GridLayer> {
        use gdal::Dataset;

        let path = path.as_ref();
        log::info!("Reading GeoTIFF grid: {}", path.display());

        let dataset = Dataset::open(path)?;
        let gt = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}, geotransform: {:?}", width, height, gt);

        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(GeoidError::InvalidGrid(format!(
                "{}: rotated rasters are not supported",
                path.display()
            )));
        }

        let rasterband = dataset.rasterband(1)?;
        let band_nodata = rasterband.no_data_value();
        let buffer = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        let raster = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| GeoidError::InvalidFormat(format!("Failed to reshape raster: {}", e)))?;

        let lons: Vec<f64> = (0..width).map(|j| gt[0] + (j as f64 + 0.5) * gt[1]).collect();
        let mut lats: Vec<f64> = (0..height).map(|i| gt[3] + (i as f64 + 0.5) * gt[5]).collect();
        let north_up = gt[5] < 0.0;
        if north_up {
            lats.reverse();
        }
        let axes = GridAxes::from_coordinates(lons, lats)?;

        let values = Array2::from_shape_fn((height, width), |(i, j)| {
            let row = if north_up { height - 1 - i } else { i };
            let v = raster[[row, j]];
            if self.is_nodata(v) || band_nodata.map_or(false, |nd| v == nd) {
                f64::NAN
            } else {
                v
            }
        });

        Ok(GridLayer { axes, values })
    }

    fn is_nodata(&self, value: f64) -> bool {
        !value.is_finite() || self.nodata.map_or(false, |nd| value == nd)
    }
}

fn parse_row(fields: &[&str]) -> Option<(f64, f64, f64)> {
    if fields.len() < 3 {
        return None;
    }
    let lon = fields[0].parse::<f64>().ok()?;
    let lat = fields[1].parse::<f64>().ok()?;
    let value = fields[2].parse::<f64>().ok()?;
    if !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    Some((lon, lat, value))
}

/// Reconstruct a full uniform axis from the coordinates present in the file
fn lattice_axis<I: Iterator<Item = f64>>(axis: &str, coords: I, label: &str) -> GeoidResult<Vec<f64>> {
    // Deduplicate on a fine lattice but keep the coordinates as written
    let mut unique: BTreeMap<i64, f64> = BTreeMap::new();
    for c in coords {
        unique.entry((c / COORD_QUANTUM).round() as i64).or_insert(c);
    }
    let unique: Vec<f64> = unique.into_values().collect();

    if unique.len() < 2 {
        return Err(GeoidError::InvalidGrid(format!(
            "{}: {} axis needs at least two distinct values",
            label, axis
        )));
    }

    let start = unique[0];
    let span = unique[unique.len() - 1] - start;
    let min_step = unique
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    if min_step <= SPACING_TOLERANCE_DEG {
        return Err(GeoidError::InvalidGrid(format!(
            "{}: {} values {}° apart are below the spacing tolerance",
            label, axis, min_step
        )));
    }

    let n_steps = (span / min_step).round().max(1.0);
    if n_steps + 1.0 > (MAX_FILL_FACTOR * unique.len()) as f64 {
        return Err(GeoidError::InvalidGrid(format!(
            "{}: {} distinct {} values would span a {}-node lattice",
            label,
            unique.len(),
            axis,
            n_steps + 1.0
        )));
    }
    let dx = span / n_steps;

    for &c in &unique {
        let steps = (c - start) / dx;
        if (steps - steps.round()).abs() * dx > SPACING_TOLERANCE_DEG {
            return Err(GeoidError::InvalidGrid(format!(
                "{}: irregular {} spacing, {} is not on the {}° lattice starting at {}",
                label, axis, c, dx, start
            )));
        }
    }

    Ok((0..=n_steps as usize).map(|k| start + k as f64 * dx).collect())
}
