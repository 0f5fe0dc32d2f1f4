use crate::core::assembler::CorrectionResult;
use crate::types::{GeoidError, GeoidResult, GridAxes};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
#[cfg(feature = "geotiff")]
use std::path::PathBuf;

/// Export of named result grids
pub struct GridWriter;

impl GridWriter {
    /// Write one row per cell with `lon,lat,<grid>...` columns.
    ///
    /// Rows run longitude-fastest from the southernmost latitude. Missing
    /// values are written as empty fields.
    pub fn write_csv<P: AsRef<Path>>(
        path: P,
        axes: &GridAxes,
        grids: &[(&str, &Array2<f64>)],
    ) -> GeoidResult<()> {
        let path = path.as_ref();
        log::info!("Writing {} grids to CSV: {}", grids.len(), path.display());

        let shape = axes.shape();
        for (name, grid) in grids {
            if grid.dim() != shape {
                return Err(GeoidError::ShapeMismatch {
                    layer: name.to_string(),
                    expected: shape,
                    got: grid.dim(),
                });
            }
        }

        let mut out = BufWriter::new(File::create(path)?);

        write!(out, "lon,lat")?;
        for (name, _) in grids {
            write!(out, ",{}", name)?;
        }
        writeln!(out)?;

        for (i, lat) in axes.lats.iter().enumerate() {
            for (j, lon) in axes.lons.iter().enumerate() {
                write!(out, "{},{}", lon, lat)?;
                for (_, grid) in grids {
                    let v = grid[[i, j]];
                    if v.is_finite() {
                        write!(out, ",{}", v)?;
                    } else {
                        write!(out, ",")?;
                    }
                }
                writeln!(out)?;
            }
        }

        out.flush()?;
        Ok(())
    }

    /// Write every named grid of a correction result to one CSV file
    pub fn write_result_csv<P: AsRef<Path>>(path: P, result: &CorrectionResult) -> GeoidResult<()> {
        Self::write_csv(path, &result.axes, &result.named_grids())
    }

    /// Save one grid as a single-band float64 GeoTIFF in EPSG:4326
    #[cfg(feature = "geotiff")]
    pub fn write_geotiff<P: AsRef<Path>>(
        path: P,
        axes: &GridAxes,
        grid: &Array2<f64>,
        compression: Option<&str>,
    ) -> GeoidResult<()> {
        use gdal::raster::{Buffer, RasterCreationOption};
        use gdal::spatial_ref::SpatialRef;
        use gdal::DriverManager;

        let path = path.as_ref();
        log::info!("Saving grid as GeoTIFF: {}", path.display());

        let (height, width) = grid.dim();
        if (height, width) != axes.shape() {
            return Err(GeoidError::ShapeMismatch {
                layer: path.display().to_string(),
                expected: axes.shape(),
                got: (height, width),
            });
        }

        // GTiff only honours COMPRESS at creation time
        let options: Vec<RasterCreationOption> = compression
            .map(|value| RasterCreationOption { key: "COMPRESS", value })
            .into_iter()
            .collect();

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type_with_options::<f64, _>(
            path,
            width as isize,
            height as isize,
            1,
            &options,
        )?;

        // North-up: first raster row is the northernmost latitude
        let dx = axes.dx_deg;
        let north_edge = axes.lats[height - 1] + dx / 2.0;
        let west_edge = axes.lons[0] - dx / 2.0;
        dataset.set_geo_transform(&[west_edge, dx, 0.0, north_edge, 0.0, -dx])?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(4326)?)?;

        let flat: Vec<f64> = (0..height)
            .rev()
            .flat_map(|i| grid.row(i).to_vec())
            .collect();

        let mut rasterband = dataset.rasterband(1)?;
        rasterband.write((0, 0), (width, height), &Buffer::new((width, height), flat))?;
        rasterband.set_no_data_value(Some(f64::NAN))?;
        Ok(())
    }

    /// Save each named grid of a result as `<dir>/<name>.tif`
    #[cfg(feature = "geotiff")]
    pub fn write_result_geotiffs<P: AsRef<Path>>(dir: P, result: &CorrectionResult) -> GeoidResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir.as_ref())?;

        let mut written = Vec::new();
        for (name, grid) in result.named_grids() {
            let path = dir.as_ref().join(format!("{}.tif", name));
            Self::write_geotiff(&path, &result.axes, grid, Some("DEFLATE"))?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let axes = GridAxes::new(10.0, 11.0, 0.0, 1.0, 1.0).unwrap();
        let a = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, f64::NAN]).unwrap();
        let b = Array2::from_elem((2, 2), 0.5);

        GridWriter::write_csv(&path, &axes, &[("a", &a), ("b", &b)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "lon,lat,a,b");
        assert_eq!(lines[1], "10,0,1,0.5");
        assert_eq!(lines[2], "11,0,2,0.5");
        assert_eq!(lines[4], "11,1,,0.5");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_shape_checked() {
        let dir = tempfile::tempdir().unwrap();
        let axes = GridAxes::new(0.0, 1.0, 0.0, 1.0, 1.0).unwrap();
        let bad = Array2::zeros((3, 2));
        let err = GridWriter::write_csv(dir.path().join("x.csv"), &axes, &[("bad", &bad)]).unwrap_err();
        assert!(matches!(err, GeoidError::ShapeMismatch { .. }));
    }

    #[cfg(feature = "geotiff")]
    #[test]
    fn test_geotiff_compressed_round_trip() {
        use crate::io::GridReader;
        use gdal::{Dataset, Metadata};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        let axes = GridAxes::new(5.0, 7.0, -1.0, 0.0, 1.0).unwrap();
        let grid = Array2::from_shape_fn(axes.shape(), |(i, j)| (10 * i + j) as f64);

        GridWriter::write_geotiff(&path, &axes, &grid, Some("DEFLATE")).unwrap();

        let dataset = Dataset::open(&path).unwrap();
        assert_eq!(
            dataset.metadata_item("COMPRESSION", "IMAGE_STRUCTURE").as_deref(),
            Some("DEFLATE")
        );
        drop(dataset);

        let layer = GridReader::new().read(&path).unwrap();
        assert_eq!(layer.axes.lons, axes.lons);
        assert_eq!(layer.axes.lats, axes.lats);
        assert_eq!(layer.values, grid);
    }
}
