use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use mlpipe::app_dirs::ProjectLayout;
use mlpipe::config::WorkflowConfig;
use mlpipe::tasks::TaskEnv;

pub const LIFE_EXPECTANCY_FILE: &str = "Life Expectancy Data.csv";
pub const PRODUCTS_FILE: &str = "Luxury_Products_Apparel_Data.csv";

pub fn env_for(root: &Path, config: WorkflowConfig) -> TaskEnv {
    TaskEnv::new(ProjectLayout::new(root), config)
}

/// Life expectancy table where mortality drives the label, plus one broken row.
pub fn write_life_expectancy_csv(root: &Path, rows: usize) {
    let mut csv = String::from(
        "Country,Year,Status,Life expectancy ,Adult Mortality,infant deaths,Alcohol,\
         percentage expenditure,Hepatitis B,Measles , BMI \n",
    );
    for i in 0..rows {
        let developed = i % 3 == 0;
        let mortality = 40.0 + (i * 37 % 400) as f32;
        let life = if developed { 82.0 } else { 74.0 } - mortality / 25.0;
        let hepatitis = if i % 7 == 0 {
            String::new()
        } else {
            format!("{}", 60 + i % 35)
        };
        let _ = writeln!(
            csv,
            "Country{i},{},{},{life:.1},{mortality},{},{:.2},{:.3},{hepatitis},{},{:.1}",
            2000 + i % 16,
            if developed { "Developed" } else { "Developing" },
            i % 90,
            (i % 12) as f32 * 0.8,
            (i * 13 % 500) as f32 * 1.7,
            i * 11 % 2000,
            15.0 + (i % 30) as f32,
        );
    }
    csv.push_str("Broken,2001,Developing,not-a-number,1,1,1,1,1,1,1\n");
    write(root.join("assets").join(LIFE_EXPECTANCY_FILE), &csv);
}

/// Product table with three categories and distinctive vocabulary.
pub fn write_products_csv(root: &Path, rows: usize) {
    let catalog = [
        (
            "Accessories",
            "Bags",
            "Leather Belt Bag",
            "A compact belt bag with zip pockets, worn across the body.",
        ),
        (
            "Accessories",
            "Wallets",
            "Shell Belt Bag",
            "Weather-resistant shell belt bag with zip compartments.",
        ),
        (
            "Clothing",
            "Dresses",
            "Silk Evening Dress",
            "A flowing silk dress, cut for evening wear.",
        ),
        (
            "Clothing",
            "Shirts",
            "Cotton Poplin Shirt",
            "Crisp cotton shirt with a pointed collar and button cuffs.",
        ),
        (
            "Shoes",
            "Sneakers",
            "Canvas Low Sneaker",
            "Low-top canvas sneaker on a rubber sole.",
        ),
        (
            "Shoes",
            "Boots",
            "Suede Chelsea Boot",
            "Suede boot with elastic side panels and a stacked heel.",
        ),
    ];
    let mut csv = String::from(",Category,SubCategory,ProductName,Description\n");
    for i in 0..rows {
        let (category, sub, name, description) = catalog[i % catalog.len()];
        let _ = writeln!(csv, "{i},{category},{sub},\"{name} {i}\",\"{description}\"");
    }
    csv.push_str("999,,Bags,\"No Category Bag\",\"missing label\"\n");
    write(root.join("assets").join(PRODUCTS_FILE), &csv);
}

/// `count` solid-ish PNG images per `(label, rgb)` under `dir/<label>/`.
pub fn write_image_folders(dir: &Path, classes: &[(&str, [u8; 3])], count: usize) {
    for (label, base) in classes {
        let folder = dir.join(label);
        fs::create_dir_all(&folder).unwrap();
        for idx in 0..count {
            let jitter = (idx * 9 % 40) as u8;
            let image = image::RgbImage::from_fn(32, 32, |x, y| {
                let shade = ((x + y) % 8) as u8 * 2;
                image::Rgb([
                    base[0].saturating_sub(jitter).saturating_add(shade),
                    base[1].saturating_sub(jitter).saturating_add(shade),
                    base[2].saturating_sub(jitter).saturating_add(shade),
                ])
            });
            image.save(folder.join(format!("{label}{idx}.png"))).unwrap();
        }
    }
}

fn write(path: impl AsRef<Path>, contents: &str) {
    let path = path.as_ref();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}
