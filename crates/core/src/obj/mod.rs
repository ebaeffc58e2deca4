//! Wavefront OBJ geometry and MTL material library parsing.

use glam::Vec3;

use crate::{Result, ViewerError};

/// Triangles sharing one material.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjGroup {
    pub material: Option<String>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjModel {
    pub positions: Vec<Vec3>,
    pub groups: Vec<ObjGroup>,
}

impl ObjModel {
    /// Parses vertex positions and faces. Polygons are fan-triangulated;
    /// normals, texture coordinates and object/group names are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut model = ObjModel::default();
        let mut current = ObjGroup {
            material: None,
            indices: Vec::new(),
        };

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };

            match keyword {
                "v" => {
                    let coords = parse_floats(parts, line_no)?;
                    if coords.len() < 3 {
                        return Err(ViewerError::parse(line_no, "vertex needs three coordinates"));
                    }
                    model.positions.push(Vec3::new(coords[0], coords[1], coords[2]));
                }
                "f" => {
                    let corners = parts
                        .map(|corner| model.resolve_index(corner, line_no))
                        .collect::<Result<Vec<u32>>>()?;
                    if corners.len() < 3 {
                        return Err(ViewerError::parse(line_no, "face needs at least three corners"));
                    }
                    for k in 1..corners.len() - 1 {
                        current
                            .indices
                            .extend_from_slice(&[corners[0], corners[k], corners[k + 1]]);
                    }
                }
                "usemtl" => {
                    let name = parts.next().map(str::to_string);
                    let previous = std::mem::replace(
                        &mut current,
                        ObjGroup {
                            material: name,
                            indices: Vec::new(),
                        },
                    );
                    if !previous.indices.is_empty() {
                        model.groups.push(previous);
                    }
                }
                _ => {}
            }
        }

        if !current.indices.is_empty() {
            model.groups.push(current);
        }
        Ok(model)
    }

    pub fn triangle_count(&self) -> usize {
        self.groups.iter().map(|group| group.indices.len() / 3).sum()
    }

    fn resolve_index(&self, corner: &str, line: usize) -> Result<u32> {
        let position = corner.split('/').next().unwrap_or("");
        let index: i64 = position
            .parse()
            .map_err(|_| ViewerError::parse(line, format!("invalid face corner `{corner}`")))?;

        let count = self.positions.len() as i64;
        let resolved = match index {
            i if i > 0 => i - 1,
            i if i < 0 => count + i,
            _ => -1,
        };
        if resolved < 0 || resolved >= count {
            return Err(ViewerError::parse(
                line,
                format!("face index {index} out of range for {count} vertices"),
            ));
        }
        Ok(resolved as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MtlMaterial {
    pub name: String,
    pub diffuse: Vec3,
    pub opacity: f32,
    pub shininess: f32,
}

impl MtlMaterial {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            diffuse: Vec3::ONE,
            opacity: 1.0,
            shininess: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MtlLibrary {
    pub materials: Vec<MtlMaterial>,
}

impl MtlLibrary {
    pub fn parse(text: &str) -> Result<Self> {
        let mut materials: Vec<MtlMaterial> = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };

            if keyword == "newmtl" {
                let name = parts
                    .next()
                    .ok_or_else(|| ViewerError::parse(line_no, "newmtl needs a name"))?;
                materials.push(MtlMaterial::new(name));
                continue;
            }

            let Some(material) = materials.last_mut() else {
                continue;
            };
            match keyword {
                "Kd" => {
                    let rgb = parse_floats(parts, line_no)?;
                    if rgb.len() < 3 {
                        return Err(ViewerError::parse(line_no, "Kd needs three components"));
                    }
                    material.diffuse = Vec3::new(rgb[0], rgb[1], rgb[2]);
                }
                "d" => material.opacity = single_float(parts, line_no)?,
                "Tr" => material.opacity = 1.0 - single_float(parts, line_no)?,
                "Ns" => material.shininess = single_float(parts, line_no)?,
                _ => {}
            }
        }

        Ok(Self { materials })
    }

    pub fn get(&self, name: &str) -> Option<&MtlMaterial> {
        self.materials.iter().find(|material| material.name == name)
    }
}

fn parse_floats<'a>(parts: impl Iterator<Item = &'a str>, line: usize) -> Result<Vec<f32>> {
    parts
        .map(|part| {
            part.parse::<f32>()
                .map_err(|_| ViewerError::parse(line, format!("expected a number, found `{part}`")))
        })
        .collect()
}

fn single_float<'a>(parts: impl Iterator<Item = &'a str>, line: usize) -> Result<f32> {
    parse_floats(parts, line)?
        .first()
        .copied()
        .ok_or_else(|| ViewerError::parse(line, "missing value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangulates_quads_per_material() {
        let text = "# hoop\nmtllib hoop.mtl\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
                    usemtl rim\nf 1/1/1 2/2/1 3/3/1 4/4/1\nusemtl net\nf -4 -3 -2\n";
        let model = ObjModel::parse(text).unwrap();

        assert_eq!(model.positions.len(), 4);
        assert_eq!(model.groups.len(), 2);
        assert_eq!(model.groups[0].material.as_deref(), Some("rim"));
        assert_eq!(model.groups[0].indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(model.groups[1].indices, vec![0, 1, 2]);
        assert_eq!(model.triangle_count(), 3);
    }

    #[test]
    fn rejects_out_of_range_faces() {
        let err = ObjModel::parse("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(matches!(err, ViewerError::Parse { line: 2, .. }));
    }

    #[test]
    fn reads_diffuse_and_opacity() {
        let text = "newmtl orange\nKd 1.0 0.5 0.0\nd 0.8\nnewmtl net\nTr 0.25\n";
        let library = MtlLibrary::parse(text).unwrap();

        let orange = library.get("orange").unwrap();
        assert_eq!(orange.diffuse, Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(orange.opacity, 0.8);
        assert_eq!(library.get("net").unwrap().opacity, 0.75);
        assert!(library.get("missing").is_none());
    }
}
