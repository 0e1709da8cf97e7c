//! CIFAR10 loading, download and preview.
//!
//! Images are stored one per matrix row in HWC order with values scaled to
//! `[0, 1]`; [`CifarData::normalize`] is applied afterwards.

use crate::error::{Error, Result};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::DataSet;
use crate::utils::transform::Normalize;
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];
pub const NUM_CLASSES: usize = CLASS_NAMES.len();

pub const IMAGE_SIDE: usize = 32;
pub const CHANNELS: usize = 3;
pub const IMAGE_DIM: usize = IMAGE_SIDE * IMAGE_SIDE * CHANNELS;

const PLANE: usize = IMAGE_SIDE * IMAGE_SIDE;
/// One label byte followed by the R, G and B planes.
const RECORD_SIZE: usize = 1 + IMAGE_DIM;

pub const DOWNLOAD_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const ARCHIVE_NAME: &str = "cifar-10-binary.tar.gz";
pub const BATCHES_DIR: &str = "cifar-10-batches-bin";
/// Extraction happens here and is renamed into place only once complete.
const STAGING_DIR: &str = ".cifar-10-extract";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn batch_files(self) -> Vec<String> {
        match self {
            Split::Train => (1..=5).map(|i| format!("data_batch_{}.bin", i)).collect(),
            Split::Test => vec!["test_batch.bin".to_string()],
        }
    }
}

pub fn class_name(label: usize) -> &'static str {
    CLASS_NAMES.get(label).copied().unwrap_or("unknown")
}

pub fn generate_label(x: &str) -> Result<u8> {
    CLASS_NAMES
        .iter()
        .position(|name| *name == x)
        .map(|idx| idx as u8)
        .ok_or_else(|| Error::Dataset(format!("bad label '{}'", x)))
}

pub struct CifarData {
    image: Matrix,
    gt: Vec<u8>,
}

impl CifarData {
    pub fn from_parts(image: Matrix, gt: Vec<u8>) -> Result<Self> {
        let (h, w) = image.shape();
        if h != gt.len() || w != IMAGE_DIM {
            return Err(Error::Shape {
                op: "cifar dataset",
                lhs: (h, w),
                rhs: (gt.len(), IMAGE_DIM),
            });
        }
        if let Some(bad) = gt.iter().find(|label| **label as usize >= NUM_CLASSES) {
            return Err(Error::Dataset(format!("label {} out of range", bad)));
        }
        Ok(Self { image, gt })
    }

    /// Reads the binary batches of `split` from `<cache_dir>/cifar-10-batches-bin`.
    pub fn load(cache_dir: impl AsRef<Path>, split: Split, limit: Option<usize>) -> Result<Self> {
        let dir = cache_dir.as_ref().join(BATCHES_DIR);
        let mut pixels = Vec::new();
        let mut gt = Vec::new();
        for name in split.batch_files() {
            if limit.map_or(false, |l| gt.len() >= l) {
                break;
            }
            let path = dir.join(&name);
            if !path.exists() {
                return Err(Error::Dataset(format!(
                    "missing batch file {}; run the download command first",
                    path.display()
                )));
            }
            let bytes = fs::read(&path)?;
            let (p, g) = parse_batch(&bytes)?;
            debug!(file = %path.display(), records = g.len(), "read CIFAR10 batch");
            pixels.extend(p);
            gt.extend(g);
        }
        if let Some(l) = limit {
            if l < gt.len() {
                gt.truncate(l);
                pixels.truncate(l * IMAGE_DIM);
            }
        }
        let image = Matrix::from_vec(gt.len(), IMAGE_DIM, pixels)?;
        info!(split = ?split, images = gt.len(), "loaded CIFAR10");
        Self::from_parts(image, gt)
    }

    /// Loads `<index>_<classname>.png` files from a directory.
    pub fn from_image_dir(source_dir: impl AsRef<Path>, limit: Option<usize>) -> Result<Self> {
        let source_dir = source_dir.as_ref();
        let mut x = Vec::new();
        for entry in fs::read_dir(source_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                x.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        x.sort();
        if let Some(l) = limit {
            x.truncate(l);
        }

        let mut gt = Vec::with_capacity(x.len());
        for name in x.iter() {
            let stem = name
                .strip_suffix(".png")
                .and_then(|stem| stem.split_once('_'))
                .map(|(_, class)| class)
                .ok_or_else(|| Error::Dataset(format!("unexpected file name '{}'", name)))?;
            gt.push(generate_label(stem)?);
        }

        let rows = x
            .par_iter()
            .map(|name| -> Result<Vec<f32>> {
                let source = source_dir.join(name);
                let img = image::open(&source)
                    .map_err(|e| Error::Image {
                        path: source.clone(),
                        source: e,
                    })?
                    .to_rgb8();
                if img.dimensions() != (IMAGE_SIDE as u32, IMAGE_SIDE as u32) {
                    return Err(Error::Dataset(format!(
                        "{} is {:?}, expected 32x32",
                        source.display(),
                        img.dimensions()
                    )));
                }
                Ok(img.as_raw().iter().map(|v| *v as f32 / 255.0).collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>>>()?;

        let image = Matrix::from_vec(gt.len(), IMAGE_DIM, rows.concat())?;
        info!(dir = %source_dir.display(), images = gt.len(), "loaded image directory");
        Self::from_parts(image, gt)
    }

    pub fn normalize(&mut self, transform: &Normalize) {
        transform.apply(&mut self.image);
    }

    pub fn labels(&self) -> &[u8] {
        &self.gt
    }

    pub fn class_distribution(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for label in &self.gt {
            counts[*label as usize] += 1;
        }
        counts
    }

    /// Writes the selected images side by side, `nrow` per line, with a 2 px
    /// black border. Pixel values are mapped back through `transform`.
    pub fn save_image_grid(
        &self,
        indices: &[usize],
        nrow: usize,
        transform: &Normalize,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        const PAD: usize = 2;
        let path = path.as_ref();
        if indices.is_empty() || nrow == 0 {
            return Err(Error::Config("image grid needs at least one image".to_string()));
        }
        let ncol = nrow.min(indices.len());
        let nlines = (indices.len() + ncol - 1) / ncol;
        let cell = IMAGE_SIDE + PAD;
        let width = (ncol * cell + PAD) as u32;
        let height = (nlines * cell + PAD) as u32;
        let mut grid = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));

        for (n, &idx) in indices.iter().enumerate() {
            let (row, _) = self.fetch_item(idx)?;
            let x0 = (n % ncol) * cell + PAD;
            let y0 = (n / ncol) * cell + PAD;
            for y in 0..IMAGE_SIDE {
                for x in 0..IMAGE_SIDE {
                    let at = (y * IMAGE_SIDE + x) * CHANNELS;
                    let mut px = [0u8; CHANNELS];
                    for (c, out) in px.iter_mut().enumerate() {
                        let v = transform.invert(row[at + c], c).clamp(0.0, 1.0);
                        *out = (v * 255.0).round() as u8;
                    }
                    grid.put_pixel((x0 + x) as u32, (y0 + y) as u32, Rgb(px));
                }
            }
        }
        grid.save(path).map_err(|e| Error::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(path = %path.display(), images = indices.len(), "saved image grid");
        Ok(())
    }
}

impl DataSet for CifarData {
    fn dim(&self) -> usize {
        IMAGE_DIM
    }

    fn len(&self) -> usize {
        self.gt.len()
    }

    fn fetch_item(&self, idx: usize) -> Result<(&[f32], u8)> {
        if idx >= self.gt.len() {
            return Err(Error::Dataset(format!(
                "fetch item with incorrect idx {} (len {})",
                idx,
                self.gt.len()
            )));
        }
        Ok((self.image.row(idx), self.gt[idx]))
    }
}

/// Parses whole records of the binary format into HWC pixels in `[0, 1]`
/// and labels.
pub fn parse_batch(bytes: &[u8]) -> Result<(Vec<f32>, Vec<u8>)> {
    if bytes.is_empty() || bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::Dataset(format!(
            "invalid batch size {} bytes, expected a multiple of {}",
            bytes.len(),
            RECORD_SIZE
        )));
    }
    let records = bytes.len() / RECORD_SIZE;
    let mut gt = Vec::with_capacity(records);
    let mut pixels = vec![0f32; records * IMAGE_DIM];
    for (record, dst) in bytes
        .chunks_exact(RECORD_SIZE)
        .zip(pixels.chunks_exact_mut(IMAGE_DIM))
    {
        let label = record[0];
        if label as usize >= NUM_CLASSES {
            return Err(Error::Dataset(format!("label {} out of range", label)));
        }
        gt.push(label);
        // planar R..R G..G B..B => interleaved RGB
        for j in 0..PLANE {
            for c in 0..CHANNELS {
                dst[j * CHANNELS + c] = record[1 + c * PLANE + j] as f32 / 255.0;
            }
        }
    }
    Ok((pixels, gt))
}

/// Fetches and unpacks the binary archive into `cache_dir`, skipping whatever
/// is already present. Returns the batches directory.
pub fn download(cache_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let cache_dir = cache_dir.as_ref();
    fs::create_dir_all(cache_dir)?;
    let extracted_dir = cache_dir.join(BATCHES_DIR);
    if extracted_dir.exists() {
        info!(dir = %extracted_dir.display(), "CIFAR10 already extracted");
        return Ok(extracted_dir);
    }

    let archive = cache_dir.join(ARCHIVE_NAME);
    if archive.exists() {
        info!(path = %archive.display(), "CIFAR10 archive already exists, skipping download");
    } else {
        info!(url = DOWNLOAD_URL, "downloading CIFAR10");
        let partial = archive.with_extension("part");
        let mut response = reqwest::blocking::get(DOWNLOAD_URL)?.error_for_status()?;
        let mut file = File::create(&partial)?;
        let bytes = response.copy_to(&mut file)?;
        fs::rename(&partial, &archive)?;
        info!(bytes, "download complete");
    }

    extract_tar_gz(&archive, cache_dir)?;
    Ok(extracted_dir)
}

/// Unpacks into a staging directory and moves the batches directory into
/// `cache_dir` only once the whole archive was read. On failure the archive is
/// removed too, so the next call downloads it again.
fn extract_tar_gz(tar_gz_path: &Path, cache_dir: &Path) -> Result<()> {
    info!(path = %tar_gz_path.display(), "extracting CIFAR10");
    let staging = cache_dir.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let extracted = unpack(tar_gz_path, &staging).and_then(|()| {
        let unpacked = staging.join(BATCHES_DIR);
        if !unpacked.is_dir() {
            return Err(Error::Dataset(format!(
                "{} does not contain {}",
                tar_gz_path.display(),
                BATCHES_DIR
            )));
        }
        fs::rename(&unpacked, cache_dir.join(BATCHES_DIR))?;
        Ok(())
    });

    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!(dir = %staging.display(), error = %e, "could not remove staging directory");
    }
    if extracted.is_err() {
        warn!(path = %tar_gz_path.display(), "extraction failed, removing archive");
        if let Err(e) = fs::remove_file(tar_gz_path) {
            warn!(path = %tar_gz_path.display(), error = %e, "could not remove archive");
        }
    }
    extracted
}

fn unpack(tar_gz_path: &Path, output_dir: &Path) -> Result<()> {
    let tar_gz = File::open(tar_gz_path)?;
    let decompressor = flate2::read::GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(decompressor);
    archive.unpack(output_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// One record per label with every R byte = label, G = 100, B = 200.
    fn synthetic_batch(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(labels.len() * RECORD_SIZE);
        for &label in labels {
            bytes.push(label);
            bytes.extend(std::iter::repeat(label).take(PLANE));
            bytes.extend(std::iter::repeat(100u8).take(PLANE));
            bytes.extend(std::iter::repeat(200u8).take(PLANE));
        }
        bytes
    }

    /// Writes a gzipped tar holding `files` under the batches directory.
    fn write_archive(path: &Path, files: &[(&str, Vec<u8>)]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", BATCHES_DIR, name), data.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    /// Batch with random pixels so the archive does not compress away.
    fn noisy_batch(n: usize, seed: u64) -> Vec<u8> {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let mut bytes = Vec::with_capacity(n * RECORD_SIZE);
        for i in 0..n {
            bytes.push((i % NUM_CLASSES) as u8);
            bytes.extend((0..IMAGE_DIM).map(|_| rng.gen::<u8>()));
        }
        bytes
    }

    #[test]
    fn test_download_extracts_existing_archive() {
        let dir = TempDir::new().unwrap();
        write_archive(
            &dir.path().join(ARCHIVE_NAME),
            &[("test_batch.bin", synthetic_batch(&[1, 2, 3]))],
        );
        let extracted = download(dir.path()).unwrap();
        assert_eq!(extracted, dir.path().join(BATCHES_DIR));
        assert!(!dir.path().join(STAGING_DIR).exists());

        let data = CifarData::load(dir.path(), Split::Test, None).unwrap();
        assert_eq!(data.labels(), &[1, 2, 3]);
    }

    #[test]
    fn test_download_skips_when_extracted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(BATCHES_DIR)).unwrap();
        // not a valid archive; reading it would fail
        let archive = dir.path().join(ARCHIVE_NAME);
        fs::write(&archive, b"garbage").unwrap();

        let extracted = download(dir.path()).unwrap();
        assert_eq!(extracted, dir.path().join(BATCHES_DIR));
        assert_eq!(fs::read(&archive).unwrap(), b"garbage");
    }

    #[test]
    fn test_truncated_archive_leaves_no_batches_dir() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join(ARCHIVE_NAME);
        write_archive(&archive, &[("test_batch.bin", noisy_batch(40, 7))]);
        let full = fs::read(&archive).unwrap();
        fs::write(&archive, &full[..full.len() * 2 / 3]).unwrap();

        assert!(download(dir.path()).is_err());
        assert!(!dir.path().join(BATCHES_DIR).exists());
        assert!(!dir.path().join(STAGING_DIR).exists());
        assert!(!archive.exists());

        // a good archive afterwards extracts normally
        write_archive(&archive, &[("test_batch.bin", noisy_batch(40, 7))]);
        download(dir.path()).unwrap();
        let data = CifarData::load(dir.path(), Split::Test, None).unwrap();
        assert_eq!(data.len(), 40);
    }

    #[test]
    fn test_archive_without_batches_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join(ARCHIVE_NAME);
        let file = File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "readme.txt", &b"hi\n"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(download(dir.path()), Err(Error::Dataset(_))));
        assert!(!dir.path().join(BATCHES_DIR).exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(NUM_CLASSES, 10);
        assert_eq!(class_name(0), "airplane");
        assert_eq!(class_name(9), "truck");
        assert_eq!(generate_label("ship").unwrap(), 8);
        assert!(generate_label("plane").is_err());
    }

    #[test]
    fn test_parse_batch_interleaves_planes() {
        let (pixels, gt) = parse_batch(&synthetic_batch(&[3, 7])).unwrap();
        assert_eq!(gt, vec![3, 7]);
        assert_eq!(pixels.len(), 2 * IMAGE_DIM);
        assert!((pixels[0] - 3.0 / 255.0).abs() < 1e-6);
        assert!((pixels[1] - 100.0 / 255.0).abs() < 1e-6);
        assert!((pixels[2] - 200.0 / 255.0).abs() < 1e-6);
        assert!((pixels[IMAGE_DIM + 3] - 7.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_batch_rejects_bad_input() {
        assert!(parse_batch(&[0u8; 10]).is_err());
        assert!(parse_batch(&synthetic_batch(&[10])).is_err());
    }

    #[test]
    fn test_load_split_with_limit() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(BATCHES_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("test_batch.bin"), synthetic_batch(&[0, 1, 2, 2])).unwrap();

        let data = CifarData::load(tmp.path(), Split::Test, None).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data.class_distribution()[2], 2);

        let data = CifarData::load(tmp.path(), Split::Test, Some(3)).unwrap();
        assert_eq!(data.labels(), &[0, 1, 2]);

        assert!(matches!(
            CifarData::load(tmp.path(), Split::Train, None),
            Err(Error::Dataset(_))
        ));
    }

    #[test]
    fn test_image_dir_and_grid() {
        let tmp = TempDir::new().unwrap();
        let mut img = RgbImage::new(32, 32);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.save(tmp.path().join("0_cat.png")).unwrap();
        img.save(tmp.path().join("1_truck.png")).unwrap();

        let mut data = CifarData::from_image_dir(tmp.path(), None).unwrap();
        assert_eq!(data.labels(), &[3, 9]);
        let (row, _) = data.fetch_item(0).unwrap();
        assert_eq!(&row[..3], &[1.0, 0.0, 0.0]);

        let norm = Normalize::default();
        data.normalize(&norm);
        let out = tmp.path().join("grid.png");
        data.save_image_grid(&[0, 1], 8, &norm, &out).unwrap();
        let grid = image::open(&out).unwrap().to_rgb8();
        assert_eq!(grid.dimensions(), (2 * 34 + 2, 36));
        assert_eq!(grid.get_pixel(2, 2), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_image_dir_rejects_unknown_names() {
        let tmp = TempDir::new().unwrap();
        RgbImage::new(32, 32).save(tmp.path().join("0_zebra.png")).unwrap();
        assert!(CifarData::from_image_dir(tmp.path(), None).is_err());
    }

    #[test]
    fn test_fetch_out_of_range() {
        let data = CifarData::from_parts(Matrix::new(1, IMAGE_DIM), vec![4]).unwrap();
        assert!(data.fetch_item(1).is_err());
        assert!(CifarData::from_parts(Matrix::new(1, IMAGE_DIM), vec![12]).is_err());
    }
}
